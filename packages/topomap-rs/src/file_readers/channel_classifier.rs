use crate::types::ChannelKind;

/// Labels of EDF+/BDF+ annotation signals. These are not data channels.
const ANNOTATION_LABELS: &[&str] = &["edf annotations", "bdf annotations"];

/// Classify a single channel label.
///
/// Priority order:
/// 1. Type prefix (e.g., "EEG Fp1" → EEG)
/// 2. Known pattern match (EOG, ECG, EMG, STIM, MEG, RESP, MISC)
/// 3. Fallback → EEG, which covers 10-20 electrode names and unlabelled inputs
pub fn classify_channel_label(label: &str) -> ChannelKind {
    let lower = label.trim().to_lowercase();
    classify_by_prefix(&lower)
        .or_else(|| classify_by_pattern(&lower))
        .unwrap_or(ChannelKind::Eeg)
}

pub fn is_annotation_channel(label: &str) -> bool {
    ANNOTATION_LABELS.contains(&label.trim().to_lowercase().as_str())
}

fn classify_by_prefix(lower: &str) -> Option<ChannelKind> {
    let prefixes: &[(&str, ChannelKind)] = &[
        ("eeg ", ChannelKind::Eeg),
        ("eog ", ChannelKind::Eog),
        ("ecg ", ChannelKind::Ecg),
        ("ekg ", ChannelKind::Ecg),
        ("emg ", ChannelKind::Emg),
        ("meg ", ChannelKind::Meg),
        ("stim ", ChannelKind::Stim),
        ("misc ", ChannelKind::Misc),
        ("resp ", ChannelKind::Resp),
        ("ref ", ChannelKind::Eeg),
    ];

    prefixes
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|&(_, kind)| kind)
}

fn classify_by_pattern(lower: &str) -> Option<ChannelKind> {
    if lower.starts_with("eog") || lower.ends_with("eog") {
        return Some(ChannelKind::Eog);
    }

    if lower.starts_with("ecg") || lower.starts_with("ekg") {
        return Some(ChannelKind::Ecg);
    }

    if lower.starts_with("emg") {
        return Some(ChannelKind::Emg);
    }

    // Status / trigger channels
    if lower == "status"
        || lower.starts_with("sti ")
        || lower.starts_with("sti0")
        || lower.starts_with("stim")
        || lower.starts_with("trigger")
        || lower.starts_with("dc")
    {
        return Some(ChannelKind::Stim);
    }

    if lower.starts_with("meg") {
        return Some(ChannelKind::Meg);
    }

    if lower.starts_with("resp") {
        return Some(ChannelKind::Resp);
    }

    if lower.starts_with("misc") {
        return Some(ChannelKind::Misc);
    }

    None
}
