//! Electrode positions
//!
//! A [`Montage`] maps canonical electrode names to 2-D head coordinates: the
//! unit circle is the head outline at the level of the Fpz-T7-Oz-T8 ring,
//! the nose points towards +y and the subject's left is -x.
//! [`resolve_layout`] matches recording labels against a montage.

use crate::error::{Result, TopomapError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Built-in reference layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MontageName {
    #[default]
    #[serde(rename = "standard_1020")]
    Standard1020,
}

impl MontageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MontageName::Standard1020 => "standard_1020",
        }
    }

    pub fn montage(&self) -> Montage {
        match self {
            MontageName::Standard1020 => Montage::standard_1020(),
        }
    }
}

impl fmt::Display for MontageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MontageName {
    type Err = TopomapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "standard_1020" | "standard-1020" | "10-20" | "1020" => Ok(MontageName::Standard1020),
            _ => Err(TopomapError::ConfigurationError(format!(
                "Unknown montage '{}'. Available: standard_1020",
                s
            ))),
        }
    }
}

/// Named electrode layout with projected 2-D positions
#[derive(Debug, Clone, PartialEq)]
pub struct Montage {
    name: String,
    positions: Vec<(String, [f64; 2])>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MontageFile {
    name: String,
    channels: Vec<ChannelPosition>,
}

impl Montage {
    /// Custom layout. Labels must be unique after normalisation and
    /// coordinates finite.
    pub fn from_positions(name: impl Into<String>, positions: Vec<(String, [f64; 2])>) -> Result<Self> {
        for (i, (label, pos)) in positions.iter().enumerate() {
            if !pos.iter().all(|v| v.is_finite()) {
                return Err(TopomapError::ConfigurationError(format!(
                    "Montage position of '{}' is not finite",
                    label
                )));
            }
            let key = normalize_label(label);
            if key.is_empty() {
                return Err(TopomapError::ConfigurationError(
                    "Montage contains an empty channel name".to_string(),
                ));
            }
            if positions[..i].iter().any(|(l, _)| normalize_label(l) == key) {
                return Err(TopomapError::ConfigurationError(format!(
                    "Montage lists channel '{}' twice",
                    label
                )));
            }
        }
        Ok(Self {
            name: name.into(),
            positions,
        })
    }

    /// Load a layout from `{"name": ..., "channels": [{"label", "x", "y"}, ...]}`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TopomapError::ConfigurationError(format!(
                "Failed to read montage '{}': {}",
                path.display(),
                e
            ))
        })?;
        let file: MontageFile = serde_json::from_str(&content).map_err(|e| {
            TopomapError::ConfigurationError(format!("Invalid montage JSON: {}", e))
        })?;
        Self::from_positions(
            file.name,
            file.channels.into_iter().map(|c| (c.label, [c.x, c.y])).collect(),
        )
    }

    /// Idealised spherical 10-10 layout, with the 10-20 aliases T3/T4/T5/T6
    /// and the ear/mastoid references A1/A2/M1/M2.
    pub fn standard_1020() -> Self {
        let mut positions: Vec<(String, [f64; 2])> = Vec::new();
        let mut add = |label: String, point: [f64; 3]| positions.push((label, project(point)));

        for &(label, incl, az) in RING {
            add(label.to_string(), sphere(incl, az));
        }

        for row in ROWS {
            let midline = sphere(row.midline_incl, row.midline_az);
            add(format!("{}z", row.inner), midline);
            for (side, odd) in [(-1.0, true), (1.0, false)] {
                let outer = sphere(90.0, side * row.outer_az);
                for k in 1..=3 {
                    let number = if odd { 2 * k - 1 } else { 2 * k };
                    add(format!("{}{}", row.inner, number), slerp(midline, outer, k as f64 / 4.0));
                }
                let (edge, extension) = if odd { (7, 9) } else { (8, 10) };
                add(format!("{}{}", row.outer, edge), outer);
                add(format!("{}{}", row.outer, extension), slerp(midline, outer, 1.25));
            }
        }

        for &(alias, target) in ALIASES {
            if let Some(pos) = positions.iter().find(|(l, _)| l == target).map(|(_, p)| *p) {
                positions.push((alias.to_string(), pos));
            }
        }

        for &(label, incl, az) in REFERENCES {
            positions.push((label.to_string(), project(sphere(incl, az))));
        }

        Self {
            name: MontageName::Standard1020.as_str().to_string(),
            positions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.positions.iter().map(|(l, _)| l.as_str()).collect()
    }

    pub fn positions(&self) -> impl Iterator<Item = ChannelPosition> + '_ {
        self.positions.iter().map(|(label, [x, y])| ChannelPosition {
            label: label.clone(),
            x: *x,
            y: *y,
        })
    }

    /// Position of a recording label, matched after [`normalize_label`].
    pub fn position(&self, label: &str) -> Option<[f64; 2]> {
        let key = normalize_label(label);
        self.positions
            .iter()
            .find(|(l, _)| normalize_label(l) == key)
            .map(|(_, p)| *p)
    }
}

impl Default for Montage {
    fn default() -> Self {
        Self::standard_1020()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPosition {
    pub label: String,
    pub x: f64,
    pub y: f64,
}

/// Channels of a recording that the montage knows, in recording order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpatialLayout {
    montage: String,
    channels: Vec<ChannelPosition>,
    unmapped: Vec<String>,
}

impl SpatialLayout {
    pub fn montage(&self) -> &str {
        &self.montage
    }

    pub fn channels(&self) -> &[ChannelPosition] {
        &self.channels
    }

    /// Recording labels the montage did not recognise.
    pub fn unmapped(&self) -> &[String] {
        &self.unmapped
    }

    pub fn position(&self, label: &str) -> Option<[f64; 2]> {
        self.channels
            .iter()
            .find(|c| c.label == label)
            .map(|c| [c.x, c.y])
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Map `labels` to montage positions; unknown labels are left out of the layout.
pub fn resolve_layout(labels: &[String], montage: &Montage) -> SpatialLayout {
    let mut channels = Vec::with_capacity(labels.len());
    let mut unmapped = Vec::new();

    for label in labels {
        match montage.position(label) {
            Some([x, y]) => channels.push(ChannelPosition {
                label: label.clone(),
                x,
                y,
            }),
            None => {
                log::debug!("Channel {} not in montage {}", label, montage.name());
                unmapped.push(label.clone());
            }
        }
    }

    if !unmapped.is_empty() {
        log::info!(
            "{} of {} channels have no position in {}",
            unmapped.len(),
            labels.len(),
            montage.name()
        );
    }

    SpatialLayout {
        montage: montage.name().to_string(),
        channels,
        unmapped,
    }
}

/// Canonical matching key: trimmed, lowercase, without an `EEG ` type prefix
/// or a `-REF` reference suffix.
pub fn normalize_label(label: &str) -> String {
    let mut key = label.trim().to_lowercase();
    if let Some(rest) = key.strip_prefix("eeg ") {
        key = rest.trim_start().to_string();
    }
    if let Some(rest) = key.strip_suffix("-ref") {
        key = rest.trim_end().to_string();
    }
    key
}

/// Electrodes placed directly by inclination and azimuth (degrees).
const RING: &[(&str, f64, f64)] = &[
    ("Nz", 112.5, 0.0),
    ("Fpz", 90.0, 0.0),
    ("Fp1", 90.0, -18.0),
    ("Fp2", 90.0, 18.0),
    ("O1", 90.0, -162.0),
    ("O2", 90.0, 162.0),
    ("Oz", 90.0, 180.0),
    ("O9", 112.5, -162.0),
    ("O10", 112.5, 162.0),
    ("Iz", 112.5, 180.0),
];

const REFERENCES: &[(&str, f64, f64)] = &[
    ("A1", 120.0, -90.0),
    ("A2", 120.0, 90.0),
    ("M1", 120.0, -110.0),
    ("M2", 120.0, 110.0),
];

const ALIASES: &[(&str, &str)] = &[("T3", "T7"), ("T4", "T8"), ("T5", "P7"), ("T6", "P8")];

/// One coronal row: midline electrode, numbered electrodes towards the
/// outer ring, and the lateral 7/8 and 9/10 positions.
struct Row {
    inner: &'static str,
    outer: &'static str,
    midline_incl: f64,
    midline_az: f64,
    outer_az: f64,
}

const ROWS: &[Row] = &[
    Row { inner: "AF", outer: "AF", midline_incl: 67.5, midline_az: 0.0, outer_az: 36.0 },
    Row { inner: "F", outer: "F", midline_incl: 45.0, midline_az: 0.0, outer_az: 54.0 },
    Row { inner: "FC", outer: "FT", midline_incl: 22.5, midline_az: 0.0, outer_az: 72.0 },
    Row { inner: "C", outer: "T", midline_incl: 0.0, midline_az: 0.0, outer_az: 90.0 },
    Row { inner: "CP", outer: "TP", midline_incl: 22.5, midline_az: 180.0, outer_az: 108.0 },
    Row { inner: "P", outer: "P", midline_incl: 45.0, midline_az: 180.0, outer_az: 126.0 },
    Row { inner: "PO", outer: "PO", midline_incl: 67.5, midline_az: 180.0, outer_az: 144.0 },
];

/// Unit-sphere point; inclination from the vertex, azimuth clockwise from the nose.
fn sphere(incl_deg: f64, az_deg: f64) -> [f64; 3] {
    let (i, a) = (incl_deg.to_radians(), az_deg.to_radians());
    [i.sin() * a.sin(), i.sin() * a.cos(), i.cos()]
}

/// Great-circle interpolation; `t` outside [0, 1] extrapolates along the arc.
fn slerp(a: [f64; 3], b: [f64; 3], t: f64) -> [f64; 3] {
    let dot = (a[0] * b[0] + a[1] * b[1] + a[2] * b[2]).clamp(-1.0, 1.0);
    let theta = dot.acos();
    if theta.abs() < 1e-12 {
        return a;
    }
    let wa = ((1.0 - t) * theta).sin() / theta.sin();
    let wb = (t * theta).sin() / theta.sin();
    [
        wa * a[0] + wb * b[0],
        wa * a[1] + wb * b[1],
        wa * a[2] + wb * b[2],
    ]
}

/// Azimuthal equidistant projection: radius is inclination / 90 degrees.
fn project(p: [f64; 3]) -> [f64; 2] {
    let horizontal = p[0].hypot(p[1]);
    let radius = horizontal.atan2(p[2]).to_degrees() / 90.0;
    if horizontal < 1e-12 {
        return [0.0, 0.0];
    }
    [radius * p[0] / horizontal, radius * p[1] / horizontal]
}
