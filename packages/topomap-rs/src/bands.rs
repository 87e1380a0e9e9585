use crate::config::Band;
use crate::error::{Result, TopomapError};
use crate::spectral::Spectrum;
use serde::Serialize;

/// How spectrum bins are reduced to one value per band and channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateOptions {
    /// Divide each channel's spectrum by its total in-range power first
    pub normalize: bool,
    /// Report `10 * log10(power)`
    pub db_scale: bool,
    /// Non-positive powers are raised to this before the log
    pub power_floor: f64,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            normalize: false,
            db_scale: true,
            power_floor: 1e-20,
        }
    }
}

impl AggregateOptions {
    /// Value reported for a band without power when `db_scale` is on.
    pub fn floor_db(&self) -> f64 {
        10.0 * self.power_floor.log10()
    }

    fn finish(&self, power: f64) -> f64 {
        if !self.db_scale {
            return power;
        }
        let clamped = if power > 0.0 { power } else { self.power_floor };
        10.0 * clamped.log10()
    }
}

/// One band's value per channel, in spectrum channel order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandPowers {
    pub band: Band,
    pub n_bins: usize,
    pub values: Vec<(String, f64)>,
}

impl BandPowers {
    pub fn value(&self, label: &str) -> Option<f64> {
        self.values.iter().find(|(l, _)| l == label).map(|(_, v)| *v)
    }

    /// (min, max) over finite values.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .map(|(_, v)| *v)
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Band name -> channel -> scalar power, in configured band order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandPowerMap {
    channels: Vec<String>,
    bands: Vec<BandPowers>,
    db_scale: bool,
    normalized: bool,
}

impl BandPowerMap {
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn bands(&self) -> &[BandPowers] {
        &self.bands
    }

    pub fn band(&self, name: &str) -> Option<&BandPowers> {
        self.bands.iter().find(|b| b.band.name == name)
    }

    pub fn value(&self, band: &str, label: &str) -> Option<f64> {
        self.band(band).and_then(|b| b.value(label))
    }

    pub fn is_db(&self) -> bool {
        self.db_scale
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// Band with the highest value for `label`; ties go to the earlier band.
    pub fn dominant_band(&self, label: &str) -> Option<&str> {
        let mut best: Option<(&str, f64)> = None;
        for bp in &self.bands {
            if let Some(v) = bp.value(label) {
                if best.map_or(true, |(_, b)| v > b) {
                    best = Some((bp.band.name.as_str(), v));
                }
            }
        }
        best.map(|(name, _)| name)
    }

    pub fn value_range(&self, band: &str) -> Option<(f64, f64)> {
        self.band(band).and_then(BandPowers::range)
    }
}

/// Fail with a configuration error if any band covers none of `freqs`.
///
/// Lets a run reject its band set as soon as the bin grid is known, before
/// any spectrum is computed.
pub fn check_band_coverage(freqs: &[f64], bands: &[Band]) -> Result<()> {
    bands.iter().try_for_each(|band| band_bins(freqs, band).map(|_| ()))
}

fn band_bins(freqs: &[f64], band: &Band) -> Result<Vec<usize>> {
    let bins: Vec<usize> = freqs
        .iter()
        .enumerate()
        .filter(|(_, &f)| band.contains(f))
        .map(|(i, _)| i)
        .collect();
    if bins.is_empty() {
        return Err(TopomapError::ConfigurationError(format!(
            "Band {} contains no frequency bins (available {:.2}-{:.2} Hz)",
            band.title(),
            freqs.first().copied().unwrap_or(0.0),
            freqs.last().copied().unwrap_or(0.0)
        )));
    }
    Ok(bins)
}

/// Reduce `spectrum` to one value per band and channel.
///
/// Each value is the mean of the bins with `low <= f < high`. Every channel
/// of the spectrum gets a value in every band.
pub fn aggregate_bands(spectrum: &Spectrum, bands: &[Band], options: &AggregateOptions) -> Result<BandPowerMap> {
    if !options.power_floor.is_finite() || options.power_floor <= 0.0 {
        return Err(TopomapError::ConfigurationError(format!(
            "Power floor must be a positive number, got {}",
            options.power_floor
        )));
    }

    let freqs = spectrum.freqs();
    let mut bin_sets = Vec::with_capacity(bands.len());
    for band in bands {
        let bins = band_bins(freqs, band)?;
        log::debug!("Band {}: {} bins", band.name, bins.len());
        bin_sets.push(bins);
    }

    let rows: Vec<(String, Vec<f64>)> = spectrum
        .rows()
        .map(|(label, row)| {
            let row = if options.normalize {
                let total: f64 = row.iter().sum();
                if total > 0.0 {
                    row.iter().map(|p| p / total).collect()
                } else {
                    vec![0.0; row.len()]
                }
            } else {
                row.to_vec()
            };
            (label.to_string(), row)
        })
        .collect();

    let band_powers = bands
        .iter()
        .zip(&bin_sets)
        .map(|(band, bins)| BandPowers {
            band: band.clone(),
            n_bins: bins.len(),
            values: rows
                .iter()
                .map(|(label, row)| {
                    let mean = bins.iter().map(|&i| row[i]).sum::<f64>() / bins.len() as f64;
                    (label.clone(), options.finish(mean))
                })
                .collect(),
        })
        .collect();

    Ok(BandPowerMap {
        channels: spectrum.channels().to_vec(),
        bands: band_powers,
        db_scale: options.db_scale,
        normalized: options.normalize,
    })
}
