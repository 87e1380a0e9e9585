//! Bad-channel detection
//!
//! Two independent heuristics run over every channel of the analysed kind and
//! their flags are unioned: an amplitude-variance test and a zero-spectrum test
//! on a provisional PSD. Flagged channels are written into the recording's bad
//! set; no samples are removed.

use crate::error::{Result, TopomapError};
use crate::spectral::{estimate_psd, WelchParams};
use crate::types::{ChannelKind, Recording};
use serde::{Deserialize, Serialize};

/// Why a channel was excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    /// Already in the recording's bad set and passes both heuristics
    Preexisting,
    /// Sample standard deviation below the configured threshold
    LowVariance,
    /// Provisional spectrum has no positive, finite power
    ZeroSpectrum,
    /// Every analysis segment overlaps a bad-data annotation
    FullyAnnotated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    pub label: String,
    pub usable: bool,
    pub reasons: Vec<FlagReason>,
}

/// Usability of every channel of one kind, in recording order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelQualityMask {
    kind: ChannelKind,
    channels: Vec<ChannelStatus>,
}

impl ChannelQualityMask {
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn channels(&self) -> &[ChannelStatus] {
        &self.channels
    }

    pub fn usable(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| c.usable)
            .map(|c| c.label.clone())
            .collect()
    }

    pub fn flagged(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| !c.usable)
            .map(|c| c.label.clone())
            .collect()
    }

    pub fn is_usable(&self, label: &str) -> bool {
        self.channels.iter().any(|c| c.label == label && c.usable)
    }

    pub fn reasons(&self, label: &str) -> &[FlagReason] {
        self.channels
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.reasons.as_slice())
            .unwrap_or(&[])
    }

    /// Copy of this mask with `labels` additionally flagged for `reason`.
    pub fn with_flagged(&self, labels: &[String], reason: FlagReason) -> Self {
        let mut mask = self.clone();
        for status in mask.channels.iter_mut().filter(|c| labels.contains(&c.label)) {
            status.usable = false;
            if !status.reasons.contains(&reason) {
                status.reasons.push(reason);
            }
        }
        mask
    }
}

/// Flags unusable channels of one kind
#[derive(Debug, Clone)]
pub struct ChannelQualityDetector {
    threshold: f64,
    params: WelchParams,
}

impl ChannelQualityDetector {
    pub fn new(threshold: f64, params: WelchParams) -> Self {
        Self { threshold, params }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Run both heuristics over the channels of `kind` and record the flags in
    /// `recording`'s bad set.
    ///
    /// Fails with [`TopomapError::NoUsableChannels`] when every channel of the
    /// kind ends up flagged; the bad set is still updated in that case.
    pub fn detect(&self, recording: &mut Recording, kind: ChannelKind) -> Result<ChannelQualityMask> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(TopomapError::ConfigurationError(format!(
                "Empty-channel threshold must be a positive number, got {}",
                self.threshold
            )));
        }

        let targets = recording.channels_of_kind(kind);
        if targets.is_empty() {
            log::warn!("Recording has no {} channels", kind);
            return Err(TopomapError::NoUsableChannels { flagged: Vec::new() });
        }

        let low_variance = flag_low_variance(recording, &targets, self.threshold);
        let zero_spectrum = flag_zero_spectrum(recording, &targets, &self.params)?;

        let channels: Vec<ChannelStatus> = targets
            .iter()
            .map(|label| {
                let mut reasons = Vec::new();
                if low_variance.contains(label) {
                    reasons.push(FlagReason::LowVariance);
                }
                if zero_spectrum.contains(label) {
                    reasons.push(FlagReason::ZeroSpectrum);
                }
                // A bad entry left by an earlier pass is not a new reason
                if reasons.is_empty() && recording.is_bad(label) {
                    reasons.push(FlagReason::Preexisting);
                }
                ChannelStatus {
                    label: label.clone(),
                    usable: reasons.is_empty(),
                    reasons,
                }
            })
            .collect();

        for status in channels.iter().filter(|c| !c.usable) {
            if recording.mark_bad(&status.label) {
                log::warn!("Flagged channel {} as bad ({:?})", status.label, status.reasons);
            }
        }

        let mask = ChannelQualityMask { kind, channels };
        let usable = mask.usable();
        log::info!(
            "Quality check: {} of {} {} channels usable",
            usable.len(),
            targets.len(),
            kind
        );

        if usable.is_empty() {
            return Err(TopomapError::NoUsableChannels {
                flagged: mask.flagged(),
            });
        }
        Ok(mask)
    }
}

/// Sample standard deviation with an `n - 1` denominator; 0 for fewer than 2 samples.
pub fn sample_std(data: &[f64]) -> f64 {
    let n = data.len();
    if n < 2 {
        return 0.0;
    }
    let mean = data.iter().sum::<f64>() / n as f64;
    let ss: f64 = data.iter().map(|x| (x - mean) * (x - mean)).sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Channels among `channels` whose sample standard deviation is below `threshold`.
pub fn flag_low_variance(recording: &Recording, channels: &[String], threshold: f64) -> Vec<String> {
    channels
        .iter()
        .filter(|label| {
            recording.channel_data(label).is_some_and(|data| {
                let std = sample_std(data);
                log::debug!("Channel {}: std {:.3e}", label, std);
                std < threshold
            })
        })
        .cloned()
        .collect()
}

/// Channels among `channels` whose provisional PSD over `[0, Nyquist]` has no
/// positive finite bin. Annotations are ignored.
///
/// Recordings shorter than one segment use a single segment spanning the whole
/// recording; fewer than two samples leave nothing to estimate.
pub fn flag_zero_spectrum(
    recording: &Recording,
    channels: &[String],
    params: &WelchParams,
) -> Result<Vec<String>> {
    let num_samples = recording.num_samples();
    if channels.is_empty() || num_samples < 2 {
        return Ok(Vec::new());
    }

    let params = if params.n_fft > num_samples {
        log::debug!(
            "Recording has {} samples, shortening provisional segments from {}",
            num_samples,
            params.n_fft
        );
        WelchParams {
            n_fft: num_samples,
            n_overlap: num_samples / 2,
            ..params.clone()
        }
    } else {
        params.clone()
    };

    let nyquist = recording.sample_rate() / 2.0;
    let spectrum = estimate_psd(recording, channels, 0.0, nyquist, &params, false)?;

    Ok(spectrum
        .rows()
        .filter(|(_, row)| {
            let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            row.is_empty() || row.iter().any(|p| !p.is_finite()) || max <= 0.0
        })
        .map(|(label, _)| label.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn recording(rows: Vec<Vec<f64>>) -> Recording {
        let labels = ["Fz", "Cz", "Pz", "Oz", "STI 014"]
            .iter()
            .take(rows.len())
            .map(|s| s.to_string())
            .collect();
        Recording::new(labels, 256.0, rows).unwrap()
    }

    fn sine(n: usize, amp: f64) -> Vec<f64> {
        (0..n)
            .map(|i| amp * (2.0 * PI * 10.0 * i as f64 / 256.0).sin())
            .collect()
    }

    #[test]
    fn test_sample_std() {
        assert_eq!(sample_std(&[]), 0.0);
        assert_eq!(sample_std(&[3.0]), 0.0);
        assert!((sample_std(&[1.0, 2.0, 3.0, 4.0]) - 1.2909944).abs() < 1e-6);
    }

    #[test]
    fn test_flat_channel_flagged() {
        let mut rec = recording(vec![sine(2560, 1.0), vec![0.0; 2560], sine(2560, 1.0)]);
        let detector = ChannelQualityDetector::new(1e-10, WelchParams::default());
        let mask = detector.detect(&mut rec, ChannelKind::Eeg).unwrap();
        assert_eq!(mask.flagged(), vec!["Cz"]);
        assert_eq!(mask.usable(), vec!["Fz", "Pz"]);
        assert_eq!(
            mask.reasons("Cz"),
            &[FlagReason::LowVariance, FlagReason::ZeroSpectrum]
        );
        assert_eq!(rec.bads(), &["Cz".to_string()]);
    }

    #[test]
    fn test_heuristics_are_independent() {
        // Cz only varies in the tail that no full segment covers: its std is
        // well above the threshold while every segment is flat.
        let mut tail_step = vec![0.0; 1000];
        tail_step[900..].iter_mut().for_each(|x| *x = 1.0);
        let mut rec = recording(vec![sine(1000, 1.0), tail_step]);
        let detector = ChannelQualityDetector::new(1e-10, WelchParams::default());
        let mask = detector.detect(&mut rec, ChannelKind::Eeg).unwrap();
        assert_eq!(mask.reasons("Cz"), &[FlagReason::ZeroSpectrum]);
        assert!(mask.is_usable("Fz"));
    }

    #[test]
    fn test_detection_is_idempotent() {
        let mut rec = recording(vec![sine(1024, 1.0), vec![0.0; 1024], sine(1024, 2.0)]);
        let detector = ChannelQualityDetector::new(1e-10, WelchParams::default());
        let first = detector.detect(&mut rec, ChannelKind::Eeg).unwrap();
        let second = detector.detect(&mut rec, ChannelKind::Eeg).unwrap();
        assert_eq!(first, second);
        assert_eq!(rec.bads().len(), 1);
        assert_eq!(second.reasons("Cz"), &[FlagReason::LowVariance, FlagReason::ZeroSpectrum]);
    }

    #[test]
    fn test_marked_bad_healthy_channel_stays_excluded() {
        let mut rec = recording(vec![sine(1024, 1.0), sine(1024, 1.0), sine(1024, 2.0)]);
        rec.mark_bad("Pz");
        let detector = ChannelQualityDetector::new(1e-10, WelchParams::default());
        let first = detector.detect(&mut rec, ChannelKind::Eeg).unwrap();
        assert_eq!(first.reasons("Pz"), &[FlagReason::Preexisting]);
        assert_eq!(first.usable(), vec!["Fz", "Cz"]);
        assert_eq!(detector.detect(&mut rec, ChannelKind::Eeg).unwrap(), first);
    }

    #[test]
    fn test_threshold_monotonic() {
        let rows = vec![sine(1024, 1e-3), sine(1024, 1.0), sine(1024, 1e-6), vec![0.0; 1024]];
        let mut previous = 0;
        for threshold in [1e-10, 1e-5, 1e-2, 10.0] {
            let rec = recording(rows.clone());
            let flagged = flag_low_variance(&rec, rec.labels(), threshold);
            assert!(flagged.len() >= previous);
            assert!(flagged.contains(&"Oz".to_string()));
            previous = flagged.len();
        }
    }

    #[test]
    fn test_all_flagged_is_error() {
        let mut rec = recording(vec![vec![0.0; 512], vec![0.0; 512]]);
        let detector = ChannelQualityDetector::new(1e-10, WelchParams::default());
        match detector.detect(&mut rec, ChannelKind::Eeg) {
            Err(TopomapError::NoUsableChannels { flagged }) => {
                assert_eq!(flagged, vec!["Fz", "Cz"]);
            }
            other => panic!("expected NoUsableChannels, got {:?}", other),
        }
        assert_eq!(rec.bads().len(), 2);
    }

    #[test]
    fn test_other_kinds_untouched() {
        let mut rec = recording(vec![
            sine(512, 1.0),
            sine(512, 1.0),
            sine(512, 1.0),
            sine(512, 1.0),
            vec![0.0; 512],
        ]);
        assert_eq!(rec.kind_of("STI 014"), Some(ChannelKind::Stim));
        let detector = ChannelQualityDetector::new(1e-10, WelchParams::default());
        let mask = detector.detect(&mut rec, ChannelKind::Eeg).unwrap();
        assert_eq!(mask.channels().len(), 4);
        assert!(rec.bads().is_empty());
    }

    #[test]
    fn test_invalid_threshold() {
        let mut rec = recording(vec![sine(512, 1.0)]);
        let detector = ChannelQualityDetector::new(0.0, WelchParams::default());
        assert!(matches!(
            detector.detect(&mut rec, ChannelKind::Eeg),
            Err(TopomapError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_short_recording_uses_single_segment() {
        let rec = recording(vec![sine(100, 1.0), vec![0.0; 100]]);
        let flagged = flag_zero_spectrum(&rec, rec.labels(), &WelchParams::default()).unwrap();
        assert_eq!(flagged, vec!["Cz"]);
    }

    #[test]
    fn test_with_flagged() {
        let mut rec = recording(vec![sine(512, 1.0), sine(512, 1.0)]);
        let detector = ChannelQualityDetector::new(1e-10, WelchParams::default());
        let mask = detector.detect(&mut rec, ChannelKind::Eeg).unwrap();
        let updated = mask.with_flagged(&["Cz".to_string()], FlagReason::FullyAnnotated);
        assert!(mask.is_usable("Cz"));
        assert!(!updated.is_usable("Cz"));
        assert_eq!(updated.reasons("Cz"), &[FlagReason::FullyAnnotated]);
    }
}
