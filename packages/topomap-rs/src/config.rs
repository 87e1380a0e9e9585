//! Run configuration
//!
//! Every field has a default and can be overridden per run. Loading from JSON
//! fills missing fields with their defaults; [`TopomapConfig::validate`] must
//! pass before a pipeline run starts.

use crate::error::{Result, TopomapError};
use crate::layout::MontageName;
use crate::render::{ColorScale, Colormap};
use crate::spectral::WelchParams;
use crate::types::ChannelKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Named half-open frequency interval `[low, high)` in Hz
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub low: f64,
    pub high: f64,
}

impl Band {
    pub fn new(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            low,
            high,
        }
    }

    #[inline]
    pub fn contains(&self, freq: f64) -> bool {
        self.low <= freq && freq < self.high
    }

    /// Panel title, e.g. "alpha (8-12 Hz)".
    pub fn title(&self) -> String {
        format!("{} ({}-{} Hz)", self.name, self.low, self.high)
    }

    /// The five canonical EEG bands.
    pub fn canonical() -> Vec<Band> {
        vec![
            Band::new("delta", 0.0, 4.0),
            Band::new("theta", 4.0, 8.0),
            Band::new("alpha", 8.0, 12.0),
            Band::new("beta", 12.0, 30.0),
            Band::new("gamma", 30.0, 35.0),
        ]
    }

    /// Parse `name=low:high`, e.g. `mu=8:13`.
    pub fn parse(spec: &str) -> Result<Band> {
        let invalid = || {
            TopomapError::ConfigurationError(format!(
                "Invalid band '{}': expected name=low:high",
                spec
            ))
        };
        let (name, range) = spec.split_once('=').ok_or_else(invalid)?;
        let (low, high) = range.split_once(':').ok_or_else(invalid)?;
        let low = low.trim().parse::<f64>().map_err(|_| invalid())?;
        let high = high.trim().parse::<f64>().map_err(|_| invalid())?;
        Ok(Band::new(name.trim(), low, high))
    }
}

/// Upper limits on render settings; together they bound the figure buffer
pub const MAX_DPI: u32 = 1200;
pub const MAX_PANEL_SIZE_IN: f64 = 20.0;
pub const MAX_PANEL_PIXELS: f64 = 4096.0;
pub const MAX_RESOLUTION: usize = 1024;

/// Output raster settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Interpolation grid cells per panel side
    #[serde(default = "default_resolution")]
    pub resolution: usize,

    /// Dots per inch of raster output
    #[serde(default = "default_dpi")]
    pub dpi: u32,

    /// Panel edge length in inches
    #[serde(default = "default_panel_size")]
    pub panel_size_in: f64,
}

fn default_resolution() -> usize {
    64
}
fn default_dpi() -> u32 {
    300
}
fn default_panel_size() -> f64 {
    2.0
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            dpi: default_dpi(),
            panel_size_in: default_panel_size(),
        }
    }
}

/// Configuration of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopomapConfig {
    /// Colormap name (see [`Colormap::names`])
    #[serde(default = "default_colormap")]
    pub colormap: String,

    /// Ordered frequency bands, one panel each
    #[serde(default = "Band::canonical")]
    pub bands: Vec<Band>,

    /// Channels whose sample standard deviation falls below this are flagged
    #[serde(default = "default_empty_channel_threshold")]
    pub empty_channel_threshold: f64,

    /// (fmin, fmax) in Hz for the final spectrum
    #[serde(default = "default_frequency_range")]
    pub frequency_range: (f64, f64),

    /// Divide each channel's spectrum by its total in-range power
    #[serde(default)]
    pub normalize: bool,

    /// Report band power as 10*log10(power)
    #[serde(default = "default_true")]
    pub db_scale: bool,

    /// Channel type analysed and mapped
    #[serde(default = "default_channel_type")]
    pub channel_type: ChannelKind,

    /// Reference layout name
    #[serde(default)]
    pub montage: MontageName,

    /// Shared or per-band value-to-colour scaling
    #[serde(default)]
    pub color_scale: ColorScale,

    #[serde(default)]
    pub welch: WelchParams,

    /// Exclude segments overlapping BAD annotations from the final spectrum
    #[serde(default = "default_true")]
    pub reject_by_annotation: bool,

    #[serde(default)]
    pub render: RenderSettings,
}

fn default_colormap() -> String {
    Colormap::default().name().to_string()
}
fn default_empty_channel_threshold() -> f64 {
    1e-10
}
fn default_frequency_range() -> (f64, f64) {
    (1.0, 40.0)
}
fn default_true() -> bool {
    true
}
fn default_channel_type() -> ChannelKind {
    ChannelKind::Eeg
}

impl Default for TopomapConfig {
    fn default() -> Self {
        Self {
            colormap: default_colormap(),
            bands: Band::canonical(),
            empty_channel_threshold: default_empty_channel_threshold(),
            frequency_range: default_frequency_range(),
            normalize: false,
            db_scale: true,
            channel_type: default_channel_type(),
            montage: MontageName::default(),
            color_scale: ColorScale::default(),
            welch: WelchParams::default(),
            reject_by_annotation: true,
            render: RenderSettings::default(),
        }
    }
}

impl TopomapConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TopomapError::ConfigurationError(format!("Invalid config JSON: {}", e)))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TopomapError::ConfigurationError(format!(
                "Failed to read config '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&content)
    }

    pub fn fmin(&self) -> f64 {
        self.frequency_range.0
    }

    pub fn fmax(&self) -> f64 {
        self.frequency_range.1
    }

    /// Parsed colormap; fails for unknown names.
    pub fn colormap(&self) -> Result<Colormap> {
        self.colormap.parse()
    }

    /// Check every field; all failures are [`TopomapError::ConfigurationError`].
    pub fn validate(&self) -> Result<()> {
        let config_err = |msg: String| Err(TopomapError::ConfigurationError(msg));

        self.colormap()?;

        let (fmin, fmax) = self.frequency_range;
        if !fmin.is_finite() || !fmax.is_finite() || fmin < 0.0 || fmin >= fmax {
            return config_err(format!(
                "Frequency range ({}, {}) must satisfy 0 <= fmin < fmax",
                fmin, fmax
            ));
        }

        if !self.empty_channel_threshold.is_finite() || self.empty_channel_threshold <= 0.0 {
            return config_err(format!(
                "empty_channel_threshold must be a positive number, got {}",
                self.empty_channel_threshold
            ));
        }

        if self.bands.is_empty() {
            return config_err("At least one band is required".to_string());
        }
        for (i, band) in self.bands.iter().enumerate() {
            if band.name.trim().is_empty() {
                return config_err(format!("Band #{} has an empty name", i + 1));
            }
            if self.bands[..i].iter().any(|b| b.name == band.name) {
                return config_err(format!("Duplicate band name '{}'", band.name));
            }
            if !band.low.is_finite() || !band.high.is_finite() || band.low >= band.high {
                return config_err(format!(
                    "Band '{}' must satisfy low < high, got [{}, {})",
                    band.name, band.low, band.high
                ));
            }
            if band.high <= fmin || band.low > fmax {
                return config_err(format!(
                    "Band '{}' [{}, {}) lies outside the frequency range [{}, {}]",
                    band.name, band.low, band.high, fmin, fmax
                ));
            }
        }

        self.welch
            .validate()
            .map_err(|e| TopomapError::ConfigurationError(e.to_string()))?;

        let render = &self.render;
        if render.resolution < 8 || render.resolution > MAX_RESOLUTION {
            return config_err(format!(
                "Render resolution must be between 8 and {}, got {}",
                MAX_RESOLUTION, render.resolution
            ));
        }
        if render.dpi == 0 || render.dpi > MAX_DPI {
            return config_err(format!("Render dpi must be between 1 and {}, got {}", MAX_DPI, render.dpi));
        }
        if !(render.panel_size_in > 0.0 && render.panel_size_in <= MAX_PANEL_SIZE_IN) {
            return config_err(format!(
                "Panel size must be in (0, {}] inches, got {}",
                MAX_PANEL_SIZE_IN, render.panel_size_in
            ));
        }
        let panel_pixels = render.panel_size_in * render.dpi as f64;
        if panel_pixels > MAX_PANEL_PIXELS {
            return config_err(format!(
                "Panel of {} in at {} dpi is {:.0} px wide; the limit is {} px",
                render.panel_size_in, render.dpi, panel_pixels, MAX_PANEL_PIXELS
            ));
        }

        Ok(())
    }
}
