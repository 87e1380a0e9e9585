/// Topography rendering
///
/// Interpolates band values between electrode positions on a square grid
/// covering the head and assigns each panel its colour bounds. The resulting
/// [`RenderResult`] is plain data owned by the caller; [`export`] turns it into
/// image files.
use crate::bands::BandPowerMap;
use crate::config::{Band, TopomapConfig};
use crate::error::{Result, TopomapError};
use crate::layout::SpatialLayout;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub mod colormap;
pub mod export;

pub use colormap::Colormap;
pub use export::ImageFormat;

/// How colour bounds are chosen across panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColorScale {
    /// Each panel spans its own min/max
    #[default]
    PerBand,
    /// All panels share the min/max over every band
    Shared,
}

/// Inverse-distance weighting exponent
const IDW_POWER: i32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub colormap: Colormap,
    pub scale: ColorScale,
    /// Grid cells per panel side
    pub resolution: usize,
    pub dpi: u32,
    pub panel_size_in: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            colormap: Colormap::default(),
            scale: ColorScale::default(),
            resolution: 64,
            dpi: 300,
            panel_size_in: 2.0,
        }
    }
}

impl RenderOptions {
    pub fn from_config(config: &TopomapConfig) -> Result<Self> {
        Ok(Self {
            colormap: config.colormap()?,
            scale: config.color_scale,
            resolution: config.render.resolution,
            dpi: config.render.dpi,
            panel_size_in: config.render.panel_size_in,
        })
    }

    /// Edge length of one panel in output pixels.
    pub fn panel_pixels(&self) -> u32 {
        ((self.panel_size_in * self.dpi as f64).round() as u32).max(16)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Electrode {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

/// One band's interpolated map
#[derive(Debug, Clone, PartialEq)]
pub struct TopomapPanel {
    band: Band,
    resolution: usize,
    /// Row-major field over the square `[-1, 1]²`, row 0 at the nose side.
    field: Vec<f64>,
    vmin: f64,
    vmax: f64,
    electrodes: Vec<Electrode>,
}

impl TopomapPanel {
    pub fn band(&self) -> &Band {
        &self.band
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.vmin, self.vmax)
    }

    pub fn electrodes(&self) -> &[Electrode] {
        &self.electrodes
    }

    /// Head coordinates of the centre of cell `(row, col)`.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let step = 2.0 / self.resolution as f64;
        (-1.0 + (col as f64 + 0.5) * step, 1.0 - (row as f64 + 0.5) * step)
    }

    /// Interpolated value of a cell; `None` outside the head circle.
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.resolution || col >= self.resolution {
            return None;
        }
        let (x, y) = self.cell_center(row, col);
        (x * x + y * y <= 1.0).then(|| self.field[row * self.resolution + col])
    }

    /// Row-major grid with cells outside the head left empty.
    pub fn grid(&self) -> Vec<Option<f64>> {
        (0..self.resolution)
            .flat_map(|row| (0..self.resolution).map(move |col| (row, col)))
            .map(|(row, col)| self.value(row, col))
            .collect()
    }

    /// Bilinear sample of the unmasked field at head coordinates.
    pub(crate) fn sample(&self, x: f64, y: f64) -> f64 {
        let n = self.resolution;
        let fx = ((x + 1.0) / 2.0 * n as f64 - 0.5).clamp(0.0, (n - 1) as f64);
        let fy = ((1.0 - y) / 2.0 * n as f64 - 0.5).clamp(0.0, (n - 1) as f64);
        let (c0, r0) = (fx.floor() as usize, fy.floor() as usize);
        let (c1, r1) = ((c0 + 1).min(n - 1), (r0 + 1).min(n - 1));
        let (tx, ty) = (fx - c0 as f64, fy - r0 as f64);
        let at = |r: usize, c: usize| self.field[r * n + c];
        let top = at(r0, c0) * (1.0 - tx) + at(r0, c1) * tx;
        let bottom = at(r1, c0) * (1.0 - tx) + at(r1, c1) * tx;
        top * (1.0 - ty) + bottom * ty
    }

    /// Position of `value` between the panel bounds, in [0, 1].
    pub fn normalized(&self, value: f64) -> f64 {
        ((value - self.vmin) / (self.vmax - self.vmin)).clamp(0.0, 1.0)
    }
}

/// A rendered figure: one panel per band, in band order
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    panels: Vec<TopomapPanel>,
    colormap: Colormap,
    scale: ColorScale,
    dpi: u32,
    panel_size_in: f64,
    unit: String,
}

impl RenderResult {
    pub fn panels(&self) -> &[TopomapPanel] {
        &self.panels
    }

    pub fn colormap(&self) -> Colormap {
        self.colormap
    }

    pub fn scale(&self) -> ColorScale {
        self.scale
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    pub fn panel_size_in(&self) -> f64 {
        self.panel_size_in
    }

    /// Unit of the mapped values ("dB", "power", ...).
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.panels.iter().map(TopomapPanel::bounds).collect()
    }

    pub fn panel_pixels(&self) -> u32 {
        ((self.panel_size_in * self.dpi as f64).round() as u32).max(16)
    }
}

/// Turns band values into interpolated panels
pub struct TopomapRenderer {
    options: RenderOptions,
}

impl TopomapRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Render one panel per band of `band_map`.
    ///
    /// Only channels with a position in `layout` take part. Fails with
    /// [`TopomapError::RenderError`] when none of them has one.
    pub fn render(&self, layout: &SpatialLayout, band_map: &BandPowerMap) -> Result<RenderResult> {
        let resolution = self.options.resolution;
        if resolution < 2 {
            return Err(TopomapError::RenderError(format!(
                "Grid resolution must be at least 2, got {}",
                resolution
            )));
        }
        if band_map.bands().is_empty() {
            return Err(TopomapError::RenderError("No bands to render".to_string()));
        }

        let positions: Vec<(&str, [f64; 2])> = band_map
            .channels()
            .iter()
            .filter_map(|label| layout.position(label).map(|p| (label.as_str(), p)))
            .collect();
        if positions.is_empty() {
            return Err(TopomapError::RenderError(format!(
                "None of the {} channels has a position in montage {}",
                band_map.channels().len(),
                layout.montage()
            )));
        }
        log::debug!(
            "Rendering {} bands from {} positioned channels",
            band_map.bands().len(),
            positions.len()
        );

        let mut panels: Vec<TopomapPanel> = band_map
            .bands()
            .par_iter()
            .map(|bp| {
                let electrodes: Vec<Electrode> = positions
                    .iter()
                    .filter_map(|&(label, [x, y])| {
                        bp.value(label).map(|value| Electrode {
                            label: label.to_string(),
                            x,
                            y,
                            value,
                        })
                    })
                    .collect();
                let field = interpolate_field(&electrodes, resolution);
                let (vmin, vmax) = value_bounds(electrodes.iter().map(|e| e.value));
                TopomapPanel {
                    band: bp.band.clone(),
                    resolution,
                    field,
                    vmin,
                    vmax,
                    electrodes,
                }
            })
            .collect();

        if self.options.scale == ColorScale::Shared {
            let (vmin, vmax) = value_bounds(
                panels
                    .iter()
                    .flat_map(|p| p.electrodes.iter().map(|e| e.value)),
            );
            for panel in &mut panels {
                panel.vmin = vmin;
                panel.vmax = vmax;
            }
        }

        let unit = match (band_map.is_normalized(), band_map.is_db()) {
            (false, true) => "dB",
            (false, false) => "power",
            (true, true) => "dB (relative)",
            (true, false) => "relative power",
        };

        Ok(RenderResult {
            panels,
            colormap: self.options.colormap,
            scale: self.options.scale,
            dpi: self.options.dpi,
            panel_size_in: self.options.panel_size_in,
            unit: unit.to_string(),
        })
    }
}

/// Min/max of finite values; a degenerate or empty range is widened by ±1.
fn value_bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (-1.0, 1.0);
    }
    if hi - lo <= 0.0 {
        return (lo - 1.0, hi + 1.0);
    }
    (lo, hi)
}

/// Inverse-distance-weighted field over every grid cell.
fn interpolate_field(electrodes: &[Electrode], resolution: usize) -> Vec<f64> {
    let step = 2.0 / resolution as f64;
    let mut field = Vec::with_capacity(resolution * resolution);
    for row in 0..resolution {
        let y = 1.0 - (row as f64 + 0.5) * step;
        for col in 0..resolution {
            let x = -1.0 + (col as f64 + 0.5) * step;
            field.push(idw(electrodes, x, y));
        }
    }
    field
}

fn idw(electrodes: &[Electrode], x: f64, y: f64) -> f64 {
    let mut sum_weights = 0.0;
    let mut sum_values = 0.0;
    for e in electrodes.iter().filter(|e| e.value.is_finite()) {
        let dist_sq = (x - e.x).powi(2) + (y - e.y).powi(2);
        if dist_sq < 1e-18 {
            return e.value;
        }
        let weight = 1.0 / dist_sq.sqrt().powi(IDW_POWER);
        sum_weights += weight;
        sum_values += weight * e.value;
    }
    if sum_weights > 0.0 {
        sum_values / sum_weights
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::{aggregate_bands, AggregateOptions};
    use crate::layout::{resolve_layout, Montage};
    use crate::spectral::Spectrum;

    fn band_map(labels: &[&str], alpha: &[f64]) -> BandPowerMap {
        let freqs: Vec<f64> = (0..=20).map(f64::from).collect();
        let rows = labels
            .iter()
            .zip(alpha)
            .map(|(l, &a)| {
                let mut row = vec![1.0; freqs.len()];
                (8..12).for_each(|i| row[i] = a);
                (l.to_string(), row)
            })
            .collect();
        let spectrum = Spectrum::from_rows(freqs, rows).unwrap();
        let bands = vec![Band::new("theta", 4.0, 8.0), Band::new("alpha", 8.0, 12.0)];
        let options = AggregateOptions {
            db_scale: false,
            ..Default::default()
        };
        aggregate_bands(&spectrum, &bands, &options).unwrap()
    }

    fn layout(labels: &[&str]) -> SpatialLayout {
        let labels: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        resolve_layout(&labels, &Montage::standard_1020())
    }

    fn options(scale: ColorScale) -> RenderOptions {
        RenderOptions {
            scale,
            resolution: 16,
            ..Default::default()
        }
    }

    #[test]
    fn test_one_panel_per_band_in_order() {
        let labels = ["Fz", "Cz", "Pz"];
        let map = band_map(&labels, &[2.0, 4.0, 8.0]);
        let result = TopomapRenderer::new(options(ColorScale::PerBand))
            .render(&layout(&labels), &map)
            .unwrap();
        let names: Vec<&str> = result.panels().iter().map(|p| p.band().name.as_str()).collect();
        assert_eq!(names, vec!["theta", "alpha"]);
        assert_eq!(result.panels()[1].bounds(), (2.0, 8.0));
        assert_eq!(result.unit(), "power");
    }

    #[test]
    fn test_degenerate_range_widened() {
        let labels = ["Fz", "Cz"];
        let map = band_map(&labels, &[3.0, 3.0]);
        let result = TopomapRenderer::new(options(ColorScale::PerBand))
            .render(&layout(&labels), &map)
            .unwrap();
        // theta is 1.0 everywhere
        assert_eq!(result.panels()[0].bounds(), (0.0, 2.0));
        assert_eq!(result.panels()[1].bounds(), (2.0, 4.0));
    }

    #[test]
    fn test_shared_scale() {
        let labels = ["Fz", "Cz", "Pz"];
        let map = band_map(&labels, &[2.0, 4.0, 8.0]);
        let result = TopomapRenderer::new(options(ColorScale::Shared))
            .render(&layout(&labels), &map)
            .unwrap();
        assert!(result.bounds().iter().all(|&b| b == (1.0, 8.0)));
    }

    #[test]
    fn test_render_is_deterministic() {
        let labels = ["Fp1", "Fp2", "C3", "C4", "O1", "O2"];
        let map = band_map(&labels, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let renderer = TopomapRenderer::new(options(ColorScale::PerBand));
        let a = renderer.render(&layout(&labels), &map).unwrap();
        let b = renderer.render(&layout(&labels), &map).unwrap();
        assert_eq!(a.bounds(), b.bounds());
        assert_eq!(a, b);
    }

    #[test]
    fn test_grid_masks_outside_head() {
        let labels = ["Fz", "Pz"];
        let map = band_map(&labels, &[2.0, 8.0]);
        let result = TopomapRenderer::new(options(ColorScale::PerBand))
            .render(&layout(&labels), &map)
            .unwrap();
        let panel = &result.panels()[1];
        let grid = panel.grid();
        assert_eq!(grid.len(), 16 * 16);
        assert!(grid[0].is_none());
        assert!(panel.value(8, 8).is_some());
        // values stay within the electrode range
        assert!(grid.iter().flatten().all(|&v| (2.0..=8.0).contains(&v)));
        // front of the head is closer to Fz
        assert!(panel.value(2, 8).unwrap() < panel.value(13, 8).unwrap());
    }

    #[test]
    fn test_no_positioned_channels() {
        let labels = ["EXG1", "EXG2"];
        let map = band_map(&labels, &[1.0, 2.0]);
        let err = TopomapRenderer::new(options(ColorScale::PerBand))
            .render(&layout(&labels), &map)
            .unwrap_err();
        assert!(matches!(err, TopomapError::RenderError(_)));
    }

    #[test]
    fn test_unpositioned_channels_ignored() {
        let map = band_map(&["Cz", "EXG1"], &[5.0, 100.0]);
        let result = TopomapRenderer::new(options(ColorScale::PerBand))
            .render(&layout(&["Cz", "EXG1"]), &map)
            .unwrap();
        assert_eq!(result.panels()[1].electrodes().len(), 1);
        assert_eq!(result.panels()[1].bounds(), (4.0, 6.0));
    }
}
