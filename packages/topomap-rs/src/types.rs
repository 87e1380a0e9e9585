use crate::error::{Result, TopomapError};
use crate::file_readers::channel_classifier::classify_channel_label;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Signal type of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Eeg,
    Eog,
    Ecg,
    Emg,
    Meg,
    Stim,
    Resp,
    Misc,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Eeg => "EEG",
            ChannelKind::Eog => "EOG",
            ChannelKind::Ecg => "ECG",
            ChannelKind::Emg => "EMG",
            ChannelKind::Meg => "MEG",
            ChannelKind::Stim => "STIM",
            ChannelKind::Resp => "RESP",
            ChannelKind::Misc => "MISC",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = TopomapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "eeg" => Ok(ChannelKind::Eeg),
            "eog" => Ok(ChannelKind::Eog),
            "ecg" | "ekg" => Ok(ChannelKind::Ecg),
            "emg" => Ok(ChannelKind::Emg),
            "meg" => Ok(ChannelKind::Meg),
            "stim" => Ok(ChannelKind::Stim),
            "resp" => Ok(ChannelKind::Resp),
            "misc" => Ok(ChannelKind::Misc),
            other => Err(TopomapError::ConfigurationError(format!(
                "Unknown channel type '{}'",
                other
            ))),
        }
    }
}

/// Annotated time interval of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Onset in seconds from recording start
    pub onset: f64,
    /// Duration in seconds (0 for instantaneous events)
    pub duration: f64,
    pub description: String,
    /// Channels the annotation applies to; empty means all channels
    #[serde(default)]
    pub channels: Vec<String>,
}

impl Annotation {
    pub fn new(onset: f64, duration: f64, description: impl Into<String>) -> Self {
        Self {
            onset,
            duration,
            description: description.into(),
            channels: Vec::new(),
        }
    }

    pub fn bad(onset: f64, duration: f64) -> Self {
        Self::new(onset, duration, "BAD")
    }

    pub fn for_channels(mut self, channels: &[&str]) -> Self {
        self.channels = channels.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Bad-data intervals are annotations whose description starts with "BAD".
    pub fn is_bad(&self) -> bool {
        self.description
            .get(..3)
            .map(|prefix| prefix.eq_ignore_ascii_case("bad"))
            .unwrap_or(false)
    }

    pub fn applies_to(&self, label: &str) -> bool {
        self.channels.is_empty() || self.channels.iter().any(|c| c == label)
    }

    /// Whether this annotation intersects the half-open time span `[start, end)`.
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        let ann_end = self.onset + self.duration.max(0.0);
        if self.duration <= 0.0 {
            return self.onset >= start && self.onset < end;
        }
        self.onset < end && start < ann_end
    }
}

/// In-memory multichannel recording
///
/// Samples are stored `[channel][sample]` in physical units. Everything except
/// the bad-channel set is fixed at construction.
#[derive(Debug, Clone)]
pub struct Recording {
    labels: Vec<String>,
    kinds: Vec<ChannelKind>,
    sample_rate: f64,
    data: Vec<Vec<f64>>,
    annotations: Vec<Annotation>,
    bads: Vec<String>,
    start_time: Option<String>,
}

impl Recording {
    /// Build a recording, classifying channel kinds from their labels.
    pub fn new(labels: Vec<String>, sample_rate: f64, data: Vec<Vec<f64>>) -> Result<Self> {
        let kinds = labels
            .iter()
            .map(|l| classify_channel_label(l))
            .collect();
        Self::with_kinds(labels, kinds, sample_rate, data)
    }

    pub fn with_kinds(
        labels: Vec<String>,
        kinds: Vec<ChannelKind>,
        sample_rate: f64,
        data: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(TopomapError::UnsupportedFormat(format!(
                "Sampling rate must be positive, got {}",
                sample_rate
            )));
        }
        if labels.len() != data.len() || labels.len() != kinds.len() {
            return Err(TopomapError::UnsupportedFormat(format!(
                "{} labels, {} kinds and {} data rows do not match",
                labels.len(),
                kinds.len(),
                data.len()
            )));
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(TopomapError::UnsupportedFormat(format!(
                    "Duplicate channel label '{}'",
                    label
                )));
            }
        }
        if let Some(first) = data.first() {
            if let Some((idx, row)) = data.iter().enumerate().find(|(_, r)| r.len() != first.len()) {
                return Err(TopomapError::UnsupportedFormat(format!(
                    "Channel '{}' has {} samples, expected {}",
                    labels[idx],
                    row.len(),
                    first.len()
                )));
            }
        }

        Ok(Self {
            labels,
            kinds,
            sample_rate,
            data,
            annotations: Vec::new(),
            bads: Vec::new(),
            start_time: None,
        })
    }

    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_start_time(mut self, start_time: Option<String>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn kinds(&self) -> &[ChannelKind] {
        &self.kinds
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.labels.len()
    }

    pub fn num_samples(&self) -> usize {
        self.data.first().map(|r| r.len()).unwrap_or(0)
    }

    pub fn duration(&self) -> f64 {
        self.num_samples() as f64 / self.sample_rate
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn start_time(&self) -> Option<&str> {
        self.start_time.as_deref()
    }

    pub fn channel_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn channel_data(&self, label: &str) -> Option<&[f64]> {
        self.channel_index(label).map(|i| self.data[i].as_slice())
    }

    pub fn kind_of(&self, label: &str) -> Option<ChannelKind> {
        self.channel_index(label).map(|i| self.kinds[i])
    }

    /// Labels of the given kind, in recording order.
    pub fn channels_of_kind(&self, kind: ChannelKind) -> Vec<String> {
        self.labels
            .iter()
            .zip(&self.kinds)
            .filter(|(_, k)| **k == kind)
            .map(|(l, _)| l.clone())
            .collect()
    }

    pub fn bads(&self) -> &[String] {
        &self.bads
    }

    pub fn is_bad(&self, label: &str) -> bool {
        self.bads.iter().any(|b| b == label)
    }

    /// Add a channel to the bad set. Returns false if it was already flagged
    /// or is not part of the recording.
    pub fn mark_bad(&mut self, label: &str) -> bool {
        if self.is_bad(label) || self.channel_index(label).is_none() {
            return false;
        }
        self.bads.push(label.to_string());
        true
    }

    /// Keep only the given channels (recording order is preserved).
    pub fn pick(self, keep: &[String]) -> Self {
        let mut labels = Vec::new();
        let mut kinds = Vec::new();
        let mut data = Vec::new();
        for ((label, kind), row) in self.labels.into_iter().zip(self.kinds).zip(self.data) {
            if keep.contains(&label) {
                labels.push(label);
                kinds.push(kind);
                data.push(row);
            }
        }
        let bads = self.bads.into_iter().filter(|b| labels.contains(b)).collect();
        Self {
            labels,
            kinds,
            sample_rate: self.sample_rate,
            data,
            annotations: self.annotations,
            bads,
            start_time: self.start_time,
        }
    }

    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            channels: self.labels.clone(),
            channel_kinds: self.kinds.clone(),
            sample_rate: self.sample_rate,
            num_samples: self.num_samples(),
            duration: self.duration(),
            num_annotations: self.annotations.len(),
            num_bad_annotations: self.annotations.iter().filter(|a| a.is_bad()).count(),
            bads: self.bads.clone(),
            start_time: self.start_time.clone(),
        }
    }
}

/// Serializable overview of a recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub channels: Vec<String>,
    pub channel_kinds: Vec<ChannelKind>,
    pub sample_rate: f64,
    pub num_samples: usize,
    pub duration: f64,
    pub num_annotations: usize,
    pub num_bad_annotations: usize,
    pub bads: Vec<String>,
    pub start_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_recording_rejects_duplicate_labels() {
        let result = Recording::new(labels(&["Fp1", "Fp1"]), 256.0, vec![vec![0.0; 4]; 2]);
        assert!(matches!(result, Err(TopomapError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_recording_rejects_ragged_rows() {
        let result = Recording::new(labels(&["Fp1", "Fp2"]), 256.0, vec![vec![0.0; 4], vec![0.0; 3]]);
        assert!(result.is_err());
    }

    #[test]
    fn test_recording_rejects_bad_sample_rate() {
        assert!(Recording::new(labels(&["Cz"]), 0.0, vec![vec![0.0; 4]]).is_err());
        assert!(Recording::new(labels(&["Cz"]), f64::NAN, vec![vec![0.0; 4]]).is_err());
    }

    #[test]
    fn test_mark_bad_is_unique() {
        let mut rec = Recording::new(labels(&["Fp1", "Cz"]), 100.0, vec![vec![0.0; 10]; 2]).unwrap();
        assert!(rec.mark_bad("Cz"));
        assert!(!rec.mark_bad("Cz"));
        assert!(!rec.mark_bad("Oz"));
        assert_eq!(rec.bads(), &["Cz".to_string()]);
    }

    #[test]
    fn test_pick_preserves_order_and_bads() {
        let mut rec = Recording::new(
            labels(&["Fp1", "Status", "Cz"]),
            100.0,
            vec![vec![1.0; 5], vec![2.0; 5], vec![3.0; 5]],
        )
        .unwrap();
        rec.mark_bad("Status");
        let picked = rec.pick(&labels(&["Cz", "Fp1"]));
        assert_eq!(picked.labels(), &labels(&["Fp1", "Cz"])[..]);
        assert!(picked.bads().is_empty());
        assert_eq!(picked.channel_data("Cz").unwrap()[0], 3.0);
    }

    #[test]
    fn test_annotation_overlap() {
        let ann = Annotation::bad(1.0, 2.0);
        assert!(ann.overlaps(0.5, 1.5));
        assert!(ann.overlaps(2.5, 4.0));
        assert!(!ann.overlaps(3.0, 4.0));
        assert!(!ann.overlaps(0.0, 1.0));

        let event = Annotation::new(2.0, 0.0, "BAD_blink");
        assert!(event.overlaps(2.0, 3.0));
        assert!(!event.overlaps(0.0, 2.0));
    }

    #[test]
    fn test_annotation_is_bad() {
        assert!(Annotation::new(0.0, 1.0, "BAD_muscle").is_bad());
        assert!(Annotation::new(0.0, 1.0, "bad").is_bad());
        assert!(!Annotation::new(0.0, 1.0, "stimulus").is_bad());
        assert!(!Annotation::new(0.0, 1.0, "ba").is_bad());
    }

    #[test]
    fn test_channel_kind_parse() {
        assert_eq!("eeg".parse::<ChannelKind>().unwrap(), ChannelKind::Eeg);
        assert_eq!("EKG".parse::<ChannelKind>().unwrap(), ChannelKind::Ecg);
        assert!("brain".parse::<ChannelKind>().is_err());
    }
}
