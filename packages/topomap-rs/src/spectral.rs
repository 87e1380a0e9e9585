//! Welch power spectral density estimation
//!
//! Each channel is cut into overlapping segments of `n_fft` samples; every
//! segment is mean-removed, windowed and transformed, and the squared
//! magnitudes are averaged. Segments touching a BAD annotation that applies to
//! the channel are left out of that channel's average.

use crate::error::{Result, TopomapError};
use crate::types::{Annotation, Recording};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;

/// Segment taper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    #[default]
    Hamming,
    Hann,
    Boxcar,
}

impl WindowKind {
    /// Periodic window of length `n`.
    pub fn coefficients(&self, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let phase = 2.0 * PI * i as f64 / n as f64;
                match self {
                    WindowKind::Hamming => 0.54 - 0.46 * phase.cos(),
                    WindowKind::Hann => 0.5 - 0.5 * phase.cos(),
                    WindowKind::Boxcar => 1.0,
                }
            })
            .collect()
    }
}

/// Welch estimator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelchParams {
    /// Segment length in samples (also the FFT length)
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,

    /// Samples shared by consecutive segments
    #[serde(default = "default_n_overlap")]
    pub n_overlap: usize,

    #[serde(default)]
    pub window: WindowKind,

    /// Subtract each segment's mean before windowing
    #[serde(default = "default_remove_dc")]
    pub remove_dc: bool,
}

fn default_n_fft() -> usize {
    256
}
fn default_n_overlap() -> usize {
    128
}
fn default_remove_dc() -> bool {
    true
}

impl Default for WelchParams {
    fn default() -> Self {
        Self {
            n_fft: default_n_fft(),
            n_overlap: default_n_overlap(),
            window: WindowKind::default(),
            remove_dc: default_remove_dc(),
        }
    }
}

impl WelchParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_fft < 2 {
            return Err(TopomapError::SpectralEstimationError(format!(
                "Segment length must be at least 2 samples, got {}",
                self.n_fft
            )));
        }
        if self.n_overlap >= self.n_fft {
            return Err(TopomapError::SpectralEstimationError(format!(
                "Segment overlap {} must be smaller than segment length {}",
                self.n_overlap, self.n_fft
            )));
        }
        Ok(())
    }

    pub fn step(&self) -> usize {
        self.n_fft - self.n_overlap
    }

    /// Index and frequency `k * fs / n_fft` of every one-sided bin with
    /// `fmin <= f <= fmax`.
    pub fn frequency_bins(&self, fs: f64, fmin: f64, fmax: f64) -> Vec<(usize, f64)> {
        (0..=self.n_fft / 2)
            .map(|k| (k, k as f64 * fs / self.n_fft as f64))
            .filter(|&(_, f)| f >= fmin && f <= fmax)
            .collect()
    }

    /// Start sample of every full segment in a signal of `num_samples`.
    pub fn segment_starts(&self, num_samples: usize) -> Vec<usize> {
        if num_samples < self.n_fft {
            return Vec::new();
        }
        (0..=num_samples - self.n_fft).step_by(self.step()).collect()
    }
}

/// Per-channel PSD over shared frequency bins
#[derive(Debug, Clone)]
pub struct Spectrum {
    freqs: Vec<f64>,
    channels: Vec<String>,
    power: Vec<Vec<f64>>,
    n_segments: Vec<usize>,
    exhausted: Vec<String>,
    sample_rate: f64,
    n_fft: usize,
}

impl Spectrum {
    /// Assemble a spectrum from precomputed rows. Sampling rate and segment
    /// length are unknown and reported as zero.
    pub fn from_rows(freqs: Vec<f64>, rows: Vec<(String, Vec<f64>)>) -> Result<Self> {
        if let Some((label, row)) = rows.iter().find(|(_, r)| r.len() != freqs.len()) {
            return Err(TopomapError::SpectralEstimationError(format!(
                "Channel '{}' has {} power bins, expected {}",
                label,
                row.len(),
                freqs.len()
            )));
        }
        let n = rows.len();
        let (channels, power) = rows.into_iter().unzip();
        Ok(Self {
            freqs,
            channels,
            power,
            n_segments: vec![1; n],
            exhausted: Vec::new(),
            sample_rate: 0.0,
            n_fft: 0,
        })
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn power(&self, label: &str) -> Option<&[f64]> {
        self.channels
            .iter()
            .position(|c| c == label)
            .map(|i| self.power[i].as_slice())
    }

    /// `(label, power row)` pairs in channel order.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.channels
            .iter()
            .map(String::as_str)
            .zip(self.power.iter().map(Vec::as_slice))
    }

    pub fn n_segments(&self, label: &str) -> Option<usize> {
        self.channels
            .iter()
            .position(|c| c == label)
            .map(|i| self.n_segments[i])
    }

    /// Channels for which every segment was excluded; they have no row.
    pub fn exhausted(&self) -> &[String] {
        &self.exhausted
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }
}

/// Compute the Welch PSD of `channels`, keeping bins with `fmin <= f <= fmax`.
pub fn estimate_psd(
    recording: &Recording,
    channels: &[String],
    fmin: f64,
    fmax: f64,
    params: &WelchParams,
    reject_by_annotation: bool,
) -> Result<Spectrum> {
    let fs = recording.sample_rate();
    if !fs.is_finite() || fs <= 0.0 {
        return Err(TopomapError::SpectralEstimationError(format!(
            "Sampling rate must be positive, got {}",
            fs
        )));
    }
    params.validate()?;

    let num_samples = recording.num_samples();
    if params.n_fft > num_samples {
        return Err(TopomapError::SpectralEstimationError(format!(
            "Segment length {} exceeds the {} available samples",
            params.n_fft, num_samples
        )));
    }
    if fmin.is_nan() || fmax.is_nan() || fmin > fmax {
        return Err(TopomapError::SpectralEstimationError(format!(
            "Invalid frequency bounds [{}, {}]",
            fmin, fmax
        )));
    }

    let n_fft = params.n_fft;
    let (bins, freqs): (Vec<usize>, Vec<f64>) =
        params.frequency_bins(fs, fmin, fmax).into_iter().unzip();
    if bins.is_empty() {
        return Err(TopomapError::SpectralEstimationError(format!(
            "No frequency bins between {} and {} Hz at {} Hz resolution",
            fmin,
            fmax,
            fs / n_fft as f64
        )));
    }

    let window = params.window.coefficients(n_fft);
    let window_power: f64 = window.iter().map(|w| w * w).sum();
    let scale = 1.0 / (fs * window_power);
    let starts = params.segment_starts(num_samples);
    let fft = FftPlanner::<f64>::new().plan_fft_forward(n_fft);

    let bad_annotations: Vec<&Annotation> = if reject_by_annotation {
        recording.annotations().iter().filter(|a| a.is_bad()).collect()
    } else {
        Vec::new()
    };

    let ctx = WelchContext {
        fft,
        window: &window,
        bins: &bins,
        starts: &starts,
        n_fft,
        fs,
        scale,
        remove_dc: params.remove_dc,
    };

    let results: Vec<(String, Option<(Vec<f64>, usize)>)> = channels
        .par_iter()
        .map(|label| {
            let data = recording.channel_data(label).ok_or_else(|| {
                TopomapError::SpectralEstimationError(format!("Unknown channel '{}'", label))
            })?;
            let rejections: Vec<&Annotation> = bad_annotations
                .iter()
                .copied()
                .filter(|a| a.applies_to(label))
                .collect();
            Ok((label.clone(), ctx.channel_psd(data, &rejections)))
        })
        .collect::<Result<_>>()?;

    let mut spectrum = Spectrum {
        freqs,
        channels: Vec::with_capacity(results.len()),
        power: Vec::with_capacity(results.len()),
        n_segments: Vec::with_capacity(results.len()),
        exhausted: Vec::new(),
        sample_rate: fs,
        n_fft,
    };
    for (label, psd) in results {
        match psd {
            Some((row, used)) => {
                if used < starts.len() {
                    log::debug!(
                        "Channel {}: {} of {} segments rejected by annotation",
                        label,
                        starts.len() - used,
                        starts.len()
                    );
                }
                spectrum.channels.push(label);
                spectrum.power.push(row);
                spectrum.n_segments.push(used);
            }
            None => {
                log::warn!("Channel {}: every segment is annotated as bad", label);
                spectrum.exhausted.push(label);
            }
        }
    }

    log::debug!(
        "Welch PSD: {} channels, {} bins ({:.3} Hz resolution), {} segments",
        spectrum.channels.len(),
        spectrum.freqs.len(),
        fs / n_fft as f64,
        starts.len()
    );

    Ok(spectrum)
}

struct WelchContext<'a> {
    fft: Arc<dyn Fft<f64>>,
    window: &'a [f64],
    bins: &'a [usize],
    starts: &'a [usize],
    n_fft: usize,
    fs: f64,
    scale: f64,
    remove_dc: bool,
}

impl WelchContext<'_> {
    /// Averaged one-sided density over kept segments, or `None` when every
    /// segment is rejected.
    fn channel_psd(&self, data: &[f64], rejections: &[&Annotation]) -> Option<(Vec<f64>, usize)> {
        let mut acc = vec![0.0; self.bins.len()];
        let mut buffer = vec![Complex::new(0.0, 0.0); self.n_fft];
        let mut used = 0usize;

        for &start in self.starts {
            let t0 = start as f64 / self.fs;
            let t1 = (start + self.n_fft) as f64 / self.fs;
            if rejections.iter().any(|a| a.overlaps(t0, t1)) {
                continue;
            }

            let segment = &data[start..start + self.n_fft];
            let mean = if self.remove_dc {
                segment.iter().sum::<f64>() / self.n_fft as f64
            } else {
                0.0
            };
            for ((slot, &x), &w) in buffer.iter_mut().zip(segment).zip(self.window) {
                *slot = Complex::new((x - mean) * w, 0.0);
            }
            self.fft.process(&mut buffer);

            for (a, &k) in acc.iter_mut().zip(self.bins) {
                *a += buffer[k].norm_sqr();
            }
            used += 1;
        }

        if used == 0 {
            return None;
        }

        let nyquist = if self.n_fft % 2 == 0 { Some(self.n_fft / 2) } else { None };
        let row = acc
            .iter()
            .zip(self.bins)
            .map(|(&a, &k)| {
                let one_sided = if k == 0 || Some(k) == nyquist { 1.0 } else { 2.0 };
                (a / used as f64 * self.scale * one_sided).max(0.0)
            })
            .collect();
        Some((row, used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Annotation;

    fn sine_recording(freq: f64, fs: f64, seconds: f64) -> Recording {
        let n = (fs * seconds) as usize;
        let sine: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect();
        Recording::new(
            vec!["Cz".to_string(), "Pz".to_string()],
            fs,
            vec![sine, vec![0.0; n]],
        )
        .unwrap()
    }

    fn labels(rec: &Recording) -> Vec<String> {
        rec.labels().to_vec()
    }

    #[test]
    fn test_peak_at_signal_frequency() {
        let rec = sine_recording(10.0, 256.0, 10.0);
        let spectrum =
            estimate_psd(&rec, &labels(&rec), 1.0, 40.0, &WelchParams::default(), true).unwrap();
        let cz = spectrum.power("Cz").unwrap();
        let (peak_idx, _) = cz
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert_eq!(spectrum.freqs()[peak_idx], 10.0);
        assert!(spectrum.power("Pz").unwrap().iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_bins_shared_and_bounded() {
        let rec = sine_recording(10.0, 256.0, 4.0);
        let spectrum =
            estimate_psd(&rec, &labels(&rec), 1.0, 40.0, &WelchParams::default(), true).unwrap();
        assert_eq!(spectrum.freqs().first(), Some(&1.0));
        assert_eq!(spectrum.freqs().last(), Some(&40.0));
        for (_, row) in spectrum.rows() {
            assert_eq!(row.len(), spectrum.freqs().len());
        }
    }

    #[test]
    fn test_parseval_total_power() {
        // A unit sine has variance 0.5; integrating the density over all bins recovers it.
        let rec = sine_recording(16.0, 256.0, 8.0);
        let params = WelchParams {
            window: WindowKind::Hann,
            ..Default::default()
        };
        let spectrum = estimate_psd(&rec, &labels(&rec), 0.0, 128.0, &params, true).unwrap();
        let df = spectrum.freqs()[1] - spectrum.freqs()[0];
        let total: f64 = spectrum.power("Cz").unwrap().iter().sum::<f64>() * df;
        assert!((total - 0.5).abs() < 0.01, "total power {}", total);
    }

    #[test]
    fn test_segment_longer_than_recording() {
        let rec = sine_recording(10.0, 100.0, 1.0);
        let err = estimate_psd(&rec, &labels(&rec), 1.0, 40.0, &WelchParams::default(), true)
            .err()
            .unwrap();
        assert!(matches!(err, TopomapError::SpectralEstimationError(_)));
    }

    #[test]
    fn test_invalid_overlap() {
        let params = WelchParams {
            n_fft: 128,
            n_overlap: 128,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_segment_starts() {
        let params = WelchParams {
            n_fft: 4,
            n_overlap: 2,
            ..Default::default()
        };
        assert_eq!(params.segment_starts(10), vec![0, 2, 4, 6]);
        assert!(params.segment_starts(3).is_empty());
    }

    #[test]
    fn test_annotation_rejects_segments() {
        let rec = sine_recording(10.0, 256.0, 10.0)
            .with_annotations(vec![Annotation::bad(0.0, 5.0)]);
        let params = WelchParams::default();
        let kept = estimate_psd(&rec, &labels(&rec), 1.0, 40.0, &params, true).unwrap();
        let all = estimate_psd(&rec, &labels(&rec), 1.0, 40.0, &params, false).unwrap();
        assert!(kept.n_segments("Cz").unwrap() < all.n_segments("Cz").unwrap());
        assert_eq!(all.n_segments("Cz").unwrap(), params.segment_starts(2560).len());
    }

    #[test]
    fn test_fully_annotated_channel_is_exhausted() {
        let rec = sine_recording(10.0, 256.0, 10.0)
            .with_annotations(vec![Annotation::bad(0.0, 10.0).for_channels(&["Pz"])]);
        let spectrum =
            estimate_psd(&rec, &labels(&rec), 1.0, 40.0, &WelchParams::default(), true).unwrap();
        assert_eq!(spectrum.channels(), &["Cz".to_string()]);
        assert_eq!(spectrum.exhausted(), &["Pz".to_string()]);
        assert!(spectrum.power("Pz").is_none());
    }

    #[test]
    fn test_channel_order_preserved() {
        let rec = sine_recording(10.0, 256.0, 2.0);
        let order = vec!["Pz".to_string(), "Cz".to_string()];
        let spectrum = estimate_psd(&rec, &order, 1.0, 40.0, &WelchParams::default(), true).unwrap();
        assert_eq!(spectrum.channels(), &order[..]);
    }

    #[test]
    fn test_frequency_bins_inclusive() {
        let params = WelchParams::default();
        let bins = params.frequency_bins(256.0, 1.0, 40.0);
        assert_eq!(bins.first(), Some(&(1, 1.0)));
        assert_eq!(bins.last(), Some(&(40, 40.0)));
        assert!(params.frequency_bins(256.0, 10.2, 10.8).is_empty());
    }

    #[test]
    fn test_no_bins_in_range() {
        let rec = sine_recording(10.0, 256.0, 2.0);
        let err = estimate_psd(&rec, &labels(&rec), 10.2, 10.8, &WelchParams::default(), true)
            .err()
            .unwrap();
        assert!(matches!(err, TopomapError::SpectralEstimationError(_)));
    }
}
