//! Figure export
//!
//! Raster figures are drawn directly into an RGB buffer. Each panel gets its
//! band title, the interpolated head surface with outline, nose and ears,
//! electrode markers, and a colour bar labelled with its bounds and unit.
//! Text is set in an embedded DejaVu Sans. The buffer is cropped to its content
//! plus a small margin before saving. SVG output carries the same elements.
//! PDF output is a single page holding the raster figure as a JPEG image,
//! sized so that it prints at the configured dpi.

use super::{RenderResult, TopomapPanel};
use crate::error::{Result, TopomapError};
use ab_glyph::{FontRef, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const INK: Rgb<u8> = Rgb([0, 0, 0]);

const FONT_DATA: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// Head radius as a fraction of the panel edge
const HEAD_RADIUS: f64 = 0.38;
/// Colour bar extent below the title band, in panel edges
const BAR_TOP: f64 = 1.03;
const BAR_BOTTOM: f64 = 1.09;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Tiff,
    Svg,
    Pdf,
}

impl ImageFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "tif" | "tiff" => Some(ImageFormat::Tiff),
            "svg" => Some(ImageFormat::Svg),
            "pdf" => Some(ImageFormat::Pdf),
            _ => None,
        }
    }

    /// Format implied by the file extension of `path`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::from_extension(ext).ok_or_else(|| {
            TopomapError::RenderError(format!(
                "Cannot infer image format from '{}'. Supported: png, jpg, tiff, svg, pdf",
                path.display()
            ))
        })
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Svg => "svg",
            ImageFormat::Pdf => "pdf",
        }
    }

    /// Whether the figure is stored as pixels (PDF pages embed the raster figure).
    pub fn is_raster(&self) -> bool {
        !matches!(self, ImageFormat::Svg)
    }

    fn image_format(&self) -> Option<image::ImageFormat> {
        match self {
            ImageFormat::Png => Some(image::ImageFormat::Png),
            ImageFormat::Jpeg => Some(image::ImageFormat::Jpeg),
            ImageFormat::Tiff => Some(image::ImageFormat::Tiff),
            ImageFormat::Svg | ImageFormat::Pdf => None,
        }
    }
}

impl RenderResult {
    /// Save with the format inferred from the extension of `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.save_as(path, ImageFormat::from_path(path)?)
    }

    pub fn save_as(&self, path: &Path, format: ImageFormat) -> Result<()> {
        match (format, format.image_format()) {
            (_, Some(raster)) => self
                .to_image()?
                .save_with_format(path, raster)
                .map_err(|e| encode_error(path, e))?,
            (ImageFormat::Pdf, None) => std::fs::write(path, self.to_pdf()?)?,
            (_, None) => std::fs::write(path, self.to_svg())?,
        }
        log::info!("Saved {} topomap to {}", format.extension(), path.display());
        Ok(())
    }

    /// Raster figure at `panel_size_in * dpi` pixels per panel, cropped to content.
    pub fn to_image(&self) -> Result<RgbImage> {
        let margin = (self.panel_pixels() / 50).max(2);
        Ok(self.draw_figure()?.0.crop_to_content(margin))
    }

    /// Uncropped figure together with the vertical layout used for every panel.
    fn draw_figure(&self) -> Result<(Canvas, PanelMetrics)> {
        let font = FontRef::try_from_slice(FONT_DATA)
            .map_err(|e| TopomapError::RenderError(format!("Failed to load embedded font: {}", e)))?;
        let p = self.panel_pixels();
        let metrics = PanelMetrics::new(p as f64);
        let width = p * self.panels().len() as u32;
        let mut canvas = Canvas::new(width, metrics.height().ceil() as u32);
        let lut = self.colormap().lut(256);

        for (i, panel) in self.panels().iter().enumerate() {
            let x0 = (i as u32 * p) as f64;
            canvas.draw_panel(panel, x0, &metrics, &lut);
            canvas.draw_labels(panel, self.unit(), x0, &metrics, &font);
        }
        Ok((canvas, metrics))
    }

    /// Single-page PDF with the raster figure placed at `dpi` resolution.
    pub fn to_pdf(&self) -> Result<Vec<u8>> {
        let img = self.to_image()?;
        let mut jpeg = Vec::new();
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, 95))
            .map_err(|e| TopomapError::RenderError(format!("Failed to encode PDF image: {}", e)))?;

        let points_per_px = 72.0 / self.dpi().max(1) as f64;
        let (w, h) = (
            img.width() as f64 * points_per_px,
            img.height() as f64 * points_per_px,
        );
        let mut pdf = PdfWriter::new();
        pdf.object(b"<< /Type /Catalog /Pages 2 0 R >>");
        pdf.object(b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
        pdf.object(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {w:.2} {h:.2}] \
                 /Resources << /XObject << /Im0 4 0 R >> >> /Contents 5 0 R >>"
            )
            .as_bytes(),
        );
        pdf.stream(
            &format!(
                "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB \
                 /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>",
                img.width(),
                img.height(),
                jpeg.len()
            ),
            &jpeg,
        );
        let content = format!("q {w:.2} 0 0 {h:.2} 0 0 cm /Im0 Do Q");
        pdf.stream(&format!("<< /Length {} >>", content.len()), content.as_bytes());
        Ok(pdf.finish(1))
    }

    pub fn to_svg(&self) -> String {
        const W: f64 = 100.0;
        const H: f64 = 120.0;
        let (cx, cy, r) = (W / 2.0, 56.0, W * HEAD_RADIUS);
        let n = self.panels().len();

        let mut svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{:.2}in\" height=\"{:.2}in\" viewBox=\"0 0 {} {}\">\n",
            self.panel_size_in() * n as f64,
            self.panel_size_in() * H / W,
            W * n as f64,
            H
        );
        svg.push_str(&format!("<rect width=\"{}\" height=\"{}\" fill=\"white\"/>\n", W * n as f64, H));

        for (i, panel) in self.panels().iter().enumerate() {
            svg.push_str(&format!("<g transform=\"translate({},0)\">\n", W * i as f64));
            svg.push_str(&format!(
                "<clipPath id=\"head{i}\"><circle cx=\"{cx}\" cy=\"{cy}\" r=\"{r}\"/></clipPath>\n"
            ));

            svg.push_str(&format!("<g clip-path=\"url(#head{})\" shape-rendering=\"crispEdges\">\n", i));
            let res = panel.resolution();
            let cell = 2.0 * r / res as f64;
            for row in 0..res {
                for col in 0..res {
                    let (hx, hy) = panel.cell_center(row, col);
                    if hx * hx + hy * hy > 1.3 {
                        continue;
                    }
                    let value = panel.field[row * res + col];
                    let color = self.colormap().color(panel.normalized(value));
                    svg.push_str(&format!(
                        "<rect x=\"{:.3}\" y=\"{:.3}\" width=\"{:.3}\" height=\"{:.3}\" fill=\"{}\"/>\n",
                        cx + hx * r - cell / 2.0,
                        cy - hy * r - cell / 2.0,
                        cell + 0.05,
                        cell + 0.05,
                        hex(color)
                    ));
                }
            }
            svg.push_str("</g>\n");

            svg.push_str(&format!(
                "<g fill=\"none\" stroke=\"black\" stroke-width=\"0.6\">\n\
                 <circle cx=\"{cx}\" cy=\"{cy}\" r=\"{r}\"/>\n\
                 <polyline points=\"{:.2},{:.2} {:.2},{:.2} {:.2},{:.2}\"/>\n\
                 <ellipse cx=\"{:.2}\" cy=\"{cy}\" rx=\"{:.2}\" ry=\"{:.2}\"/>\n\
                 <ellipse cx=\"{:.2}\" cy=\"{cy}\" rx=\"{:.2}\" ry=\"{:.2}\"/>\n</g>\n",
                cx - NOSE_HALF_WIDTH * r,
                cy - NOSE_BASE * r,
                cx,
                cy - NOSE_TIP * r,
                cx + NOSE_HALF_WIDTH * r,
                cy - NOSE_BASE * r,
                cx - EAR_OFFSET * r,
                EAR_RX * r,
                EAR_RY * r,
                cx + EAR_OFFSET * r,
                EAR_RX * r,
                EAR_RY * r,
            ));

            for e in panel.electrodes() {
                svg.push_str(&format!(
                    "<circle cx=\"{:.2}\" cy=\"{:.2}\" r=\"0.9\" fill=\"black\"><title>{}: {:.4}</title></circle>\n",
                    cx + e.x * r,
                    cy - e.y * r,
                    xml_escape(&e.label),
                    e.value
                ));
            }

            svg.push_str(&format!(
                "<text x=\"{cx}\" y=\"7\" font-family=\"sans-serif\" font-size=\"5\" text-anchor=\"middle\">{}</text>\n",
                xml_escape(&panel.band().title())
            ));

            let stops: String = (0..=10)
                .map(|k| {
                    let t = k as f64 / 10.0;
                    format!(
                        "<stop offset=\"{:.1}\" stop-color=\"{}\"/>",
                        t,
                        hex(self.colormap().color(t))
                    )
                })
                .collect();
            let (vmin, vmax) = panel.bounds();
            svg.push_str(&format!(
                "<linearGradient id=\"cbar{i}\">{stops}</linearGradient>\n\
                 <rect x=\"15\" y=\"101\" width=\"70\" height=\"5\" fill=\"url(#cbar{i})\" stroke=\"black\" stroke-width=\"0.3\"/>\n\
                 <g font-family=\"sans-serif\" font-size=\"3.5\" text-anchor=\"middle\">\n\
                 <text x=\"15\" y=\"111\">{:.3}</text><text x=\"85\" y=\"111\">{:.3}</text>\
                 <text x=\"50\" y=\"111\">{}</text>\n</g>\n",
                vmin,
                vmax,
                xml_escape(self.unit())
            ));

            svg.push_str("</g>\n");
        }

        svg.push_str("</svg>\n");
        svg
    }
}

// Head decorations in head-radius units
const NOSE_HALF_WIDTH: f64 = 0.14;
const NOSE_BASE: f64 = 0.99;
const NOSE_TIP: f64 = 1.12;
const EAR_OFFSET: f64 = 1.06;
const EAR_RX: f64 = 0.06;
const EAR_RY: f64 = 0.2;

/// Vertical layout of a panel column in pixels: title band, head square,
/// colour bar, then the bar labels.
struct PanelMetrics {
    edge: f64,
    title_px: f32,
    label_px: f32,
    title_height: f64,
}

impl PanelMetrics {
    fn new(edge: f64) -> Self {
        let title_px = (edge * 0.075).max(9.0);
        let label_px = (edge * 0.055).max(7.0);
        Self {
            edge,
            title_px: title_px as f32,
            label_px: label_px as f32,
            title_height: title_px * 1.6,
        }
    }

    fn head_center_y(&self) -> f64 {
        self.title_height + self.edge / 2.0
    }

    fn bar_top(&self) -> f64 {
        self.title_height + self.edge * BAR_TOP
    }

    fn bar_bottom(&self) -> f64 {
        self.title_height + self.edge * BAR_BOTTOM
    }

    fn label_top(&self) -> f64 {
        self.bar_bottom() + self.label_px as f64 * 0.3
    }

    fn height(&self) -> f64 {
        self.label_top() + self.label_px as f64 * 1.5
    }
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Center,
    Right,
}

struct Canvas {
    img: RgbImage,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            img: RgbImage::from_pixel(width.max(1), height.max(1), BACKGROUND),
        }
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.img.width() && (y as u32) < self.img.height() {
            self.img.put_pixel(x as u32, y as u32, color);
        }
    }

    /// Filled disc.
    fn stamp(&mut self, cx: f64, cy: f64, radius: f64, color: Rgb<u8>) {
        let r = radius.max(0.5);
        let (x0, x1) = ((cx - r).floor() as i64, (cx + r).ceil() as i64);
        let (y0, y1) = ((cy - r).floor() as i64, (cy + r).ceil() as i64);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let dx = x as f64 + 0.5 - cx;
                let dy = y as f64 + 0.5 - cy;
                if dx * dx + dy * dy <= r * r {
                    self.put(x, y, color);
                }
            }
        }
    }

    fn line(&mut self, from: (f64, f64), to: (f64, f64), width: f64, color: Rgb<u8>) {
        let len = (to.0 - from.0).hypot(to.1 - from.1);
        let steps = (len * 2.0).ceil().max(1.0) as usize;
        for s in 0..=steps {
            let t = s as f64 / steps as f64;
            self.stamp(
                from.0 + (to.0 - from.0) * t,
                from.1 + (to.1 - from.1) * t,
                width / 2.0,
                color,
            );
        }
    }

    fn ellipse(&mut self, cx: f64, cy: f64, rx: f64, ry: f64, width: f64, color: Rgb<u8>) {
        let steps = ((rx.max(ry) * 2.0 * PI) * 2.0).ceil().max(8.0) as usize;
        for s in 0..steps {
            let a = 2.0 * PI * s as f64 / steps as f64;
            self.stamp(cx + rx * a.cos(), cy + ry * a.sin(), width / 2.0, color);
        }
    }

    /// Text anchored at `x` with its line box starting at `y`.
    fn text(&mut self, font: &FontRef<'_>, px: f32, text: &str, x: f64, y: f64, align: Align) {
        let scale = PxScale::from(px);
        let (w, _) = text_size(scale, font, text);
        let left = match align {
            Align::Left => x,
            Align::Center => x - w as f64 / 2.0,
            Align::Right => x - w as f64,
        };
        draw_text_mut(&mut self.img, INK, left.round() as i32, y.round() as i32, scale, font, text);
    }

    fn draw_labels(
        &mut self,
        panel: &TopomapPanel,
        unit: &str,
        x0: f64,
        metrics: &PanelMetrics,
        font: &FontRef<'_>,
    ) {
        let p = metrics.edge;
        let title_y = (metrics.title_height - metrics.title_px as f64 * 1.2) / 2.0;
        self.text(font, metrics.title_px, &panel.band().title(), x0 + p / 2.0, title_y, Align::Center);

        let (vmin, vmax) = panel.bounds();
        let y = metrics.label_top();
        self.text(font, metrics.label_px, &format!("{:.3}", vmin), x0 + 0.15 * p, y, Align::Left);
        self.text(font, metrics.label_px, &format!("{:.3}", vmax), x0 + 0.85 * p, y, Align::Right);
        self.text(font, metrics.label_px, unit, x0 + p / 2.0, y, Align::Center);
    }

    fn draw_panel(&mut self, panel: &TopomapPanel, x0: f64, metrics: &PanelMetrics, lut: &[[u8; 3]]) {
        let p = metrics.edge;
        let cx = x0 + p / 2.0;
        let cy = metrics.head_center_y();
        let r = p * HEAD_RADIUS;
        let stroke = (p / 150.0).max(1.0);
        let to_px = |x: f64, y: f64| (cx + x * r, cy - y * r);
        let color_of = |t: f64| {
            let idx = (t * (lut.len() - 1) as f64).round() as usize;
            Rgb(lut[idx.min(lut.len() - 1)])
        };

        // Surface
        let (px0, px1) = ((cx - r).floor() as i64, (cx + r).ceil() as i64);
        let (py0, py1) = ((cy - r).floor() as i64, (cy + r).ceil() as i64);
        for py in py0..=py1 {
            for px in px0..=px1 {
                let hx = (px as f64 + 0.5 - cx) / r;
                let hy = (cy - (py as f64 + 0.5)) / r;
                if hx * hx + hy * hy <= 1.0 {
                    let t = panel.normalized(panel.sample(hx, hy));
                    self.put(px, py, color_of(t));
                }
            }
        }

        // Outline, nose, ears
        self.ellipse(cx, cy, r, r, stroke, INK);
        let nose_left = to_px(-NOSE_HALF_WIDTH, NOSE_BASE);
        let nose_tip = to_px(0.0, NOSE_TIP);
        let nose_right = to_px(NOSE_HALF_WIDTH, NOSE_BASE);
        self.line(nose_left, nose_tip, stroke, INK);
        self.line(nose_tip, nose_right, stroke, INK);
        for side in [-1.0, 1.0] {
            let (ex, ey) = to_px(side * EAR_OFFSET, 0.0);
            self.ellipse(ex, ey, EAR_RX * r, EAR_RY * r, stroke, INK);
        }

        for e in panel.electrodes() {
            let (ex, ey) = to_px(e.x, e.y);
            self.stamp(ex, ey, (p / 110.0).max(1.0), INK);
        }

        // Colour bar
        let (left, right) = (x0 + 0.15 * p, x0 + 0.85 * p);
        let (top, bottom) = (metrics.bar_top(), metrics.bar_bottom());
        for px in left.floor() as i64..right.ceil() as i64 {
            let t = ((px as f64 + 0.5 - left) / (right - left)).clamp(0.0, 1.0);
            let color = color_of(t);
            for py in top.floor() as i64..bottom.ceil() as i64 {
                self.put(px, py, color);
            }
        }
        let border = (p / 300.0).max(1.0);
        self.line((left, top), (right, top), border, INK);
        self.line((left, bottom), (right, bottom), border, INK);
        self.line((left, top), (left, bottom), border, INK);
        self.line((right, top), (right, bottom), border, INK);
    }

    /// Crop to the bounding box of non-background pixels plus `margin`.
    fn crop_to_content(self, margin: u32) -> RgbImage {
        let (w, h) = self.img.dimensions();
        let mut bbox: Option<(u32, u32, u32, u32)> = None;
        for (x, y, px) in self.img.enumerate_pixels() {
            if *px != BACKGROUND {
                bbox = Some(match bbox {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }
        let Some((x0, y0, x1, y1)) = bbox else {
            return self.img;
        };
        let (x0, y0) = (x0.saturating_sub(margin), y0.saturating_sub(margin));
        let (x1, y1) = ((x1 + margin).min(w - 1), (y1 + margin).min(h - 1));
        image::imageops::crop_imm(&self.img, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image()
    }
}

fn encode_error(path: &Path, e: image::ImageError) -> TopomapError {
    match e {
        image::ImageError::IoError(io) => TopomapError::IoError(io),
        other => TopomapError::RenderError(format!("Failed to encode {}: {}", path.display(), other)),
    }
}

/// Sequentially numbered PDF objects followed by the cross-reference table.
struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl PdfWriter {
    fn new() -> Self {
        Self {
            buf: b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec(),
            offsets: Vec::new(),
        }
    }

    fn begin(&mut self) {
        self.offsets.push(self.buf.len());
        let header = format!("{} 0 obj\n", self.offsets.len());
        self.buf.extend_from_slice(header.as_bytes());
    }

    fn object(&mut self, body: &[u8]) {
        self.begin();
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
    }

    fn stream(&mut self, dict: &str, data: &[u8]) {
        self.begin();
        self.buf.extend_from_slice(dict.as_bytes());
        self.buf.extend_from_slice(b"\nstream\n");
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
    }

    /// Cross-reference entries are fixed 20-byte lines.
    fn finish(mut self, root: usize) -> Vec<u8> {
        let xref = self.buf.len();
        let mut table = format!("xref\n0 {}\n0000000000 65535 f \n", self.offsets.len() + 1);
        for offset in &self.offsets {
            table.push_str(&format!("{:010} 00000 n \n", offset));
        }
        table.push_str(&format!(
            "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            self.offsets.len() + 1,
            root,
            xref
        ));
        self.buf.extend_from_slice(table.as_bytes());
        self.buf
    }
}

fn hex(c: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
