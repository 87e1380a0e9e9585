use crate::error::{Result, TopomapError};
use palette::{LinSrgb, Mix, Srgb};
use std::fmt;
use std::str::FromStr;

/// Named colour scales for mapping normalised values to colours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Colormap {
    /// Diverging blue-white-red (default for band power)
    #[default]
    RdBuR,
    Jet,
    Coolwarm,
    Seismic,
    Viridis,
    Plasma,
    Inferno,
    Magma,
    Cividis,
    Reds,
    Blues,
    Greens,
}

const ALL: &[Colormap] = &[
    Colormap::RdBuR,
    Colormap::Jet,
    Colormap::Coolwarm,
    Colormap::Seismic,
    Colormap::Viridis,
    Colormap::Plasma,
    Colormap::Inferno,
    Colormap::Magma,
    Colormap::Cividis,
    Colormap::Reds,
    Colormap::Blues,
    Colormap::Greens,
];

impl Colormap {
    pub fn all() -> &'static [Colormap] {
        ALL
    }

    pub fn names() -> Vec<&'static str> {
        ALL.iter().map(Colormap::name).collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Colormap::RdBuR => "RdBu_r",
            Colormap::Jet => "jet",
            Colormap::Coolwarm => "coolwarm",
            Colormap::Seismic => "seismic",
            Colormap::Viridis => "viridis",
            Colormap::Plasma => "plasma",
            Colormap::Inferno => "inferno",
            Colormap::Magma => "magma",
            Colormap::Cividis => "cividis",
            Colormap::Reds => "Reds",
            Colormap::Blues => "Blues",
            Colormap::Greens => "Greens",
        }
    }

    pub fn is_diverging(&self) -> bool {
        matches!(self, Colormap::RdBuR | Colormap::Coolwarm | Colormap::Seismic)
    }

    /// Evenly spaced anchor colours from low to high, as 0xRRGGBB.
    fn stops(&self) -> &'static [u32] {
        match self {
            Colormap::RdBuR => &[
                0x053061, 0x2166ac, 0x4393c3, 0x92c5de, 0xd1e5f0, 0xf7f7f7, 0xfddbc7, 0xf4a582,
                0xd6604d, 0xb2182b, 0x67001f,
            ],
            Colormap::Jet => &[
                0x00007f, 0x0000ff, 0x007fff, 0x00ffff, 0x7fff7f, 0xffff00, 0xff7f00, 0xff0000,
                0x7f0000,
            ],
            Colormap::Coolwarm => &[
                0x3b4cc0, 0x6788ee, 0x9abbff, 0xc9d7f0, 0xedd1c2, 0xf7a889, 0xe26952, 0xb40426,
            ],
            Colormap::Seismic => &[0x00004c, 0x0000ff, 0xffffff, 0xff0000, 0x7f0000],
            Colormap::Viridis => &[
                0x440154, 0x482878, 0x3e4989, 0x31688e, 0x26828e, 0x1f9e89, 0x35b779, 0x6ece58,
                0xb5de2b, 0xfde725,
            ],
            Colormap::Plasma => &[
                0x0d0887, 0x46039f, 0x7201a8, 0x9c179e, 0xbd3786, 0xd8576b, 0xed7953, 0xfb9f3a,
                0xfdca26, 0xf0f921,
            ],
            Colormap::Inferno => &[
                0x000004, 0x1b0c41, 0x4a0c6b, 0x781c6d, 0xa52c60, 0xcf4446, 0xed6925, 0xfb9b06,
                0xf7d13d, 0xfcffa4,
            ],
            Colormap::Magma => &[
                0x000004, 0x180f3d, 0x440f76, 0x721f81, 0x9e2f7f, 0xcd4071, 0xf1605d, 0xfd9668,
                0xfeca8d, 0xfcfdbf,
            ],
            Colormap::Cividis => &[
                0x00224e, 0x123570, 0x3b496c, 0x575d6d, 0x707173, 0x8a8779, 0xa69d75, 0xc4b56c,
                0xe4cf5b, 0xfee838,
            ],
            Colormap::Reds => &[
                0xfff5f0, 0xfee0d2, 0xfcbba1, 0xfc9272, 0xfb6a4a, 0xef3b2c, 0xcb181d, 0xa50f15,
                0x67000d,
            ],
            Colormap::Blues => &[
                0xf7fbff, 0xdeebf7, 0xc6dbef, 0x9ecae1, 0x6baed6, 0x4292c6, 0x2171b5, 0x08519c,
                0x08306b,
            ],
            Colormap::Greens => &[
                0xf7fcf5, 0xe5f5e0, 0xc7e9c0, 0xa1d99b, 0x74c476, 0x41ab5d, 0x238b45, 0x006d2c,
                0x00441b,
            ],
        }
    }

    /// Colour at `t` in [0, 1] (clamped; NaN maps to the low end).
    pub fn color(&self, t: f64) -> [u8; 3] {
        let stops = self.stops();
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let pos = t * (stops.len() - 1) as f64;
        let idx = (pos.floor() as usize).min(stops.len() - 2);
        let frac = (pos - idx as f64) as f32;

        let mixed = linear(stops[idx]).mix(linear(stops[idx + 1]), frac);
        let srgb: Srgb<f32> = Srgb::from_linear(mixed);
        let out: Srgb<u8> = srgb.into_format();
        [out.red, out.green, out.blue]
    }

    /// `n` colours sampled evenly from low to high.
    pub fn lut(&self, n: usize) -> Vec<[u8; 3]> {
        match n {
            0 => Vec::new(),
            1 => vec![self.color(0.5)],
            _ => (0..n).map(|i| self.color(i as f64 / (n - 1) as f64)).collect(),
        }
    }
}

fn linear(hex: u32) -> LinSrgb {
    let srgb = Srgb::new(
        ((hex >> 16) & 0xff) as u8,
        ((hex >> 8) & 0xff) as u8,
        (hex & 0xff) as u8,
    );
    srgb.into_format::<f32>().into_linear()
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Colormap {
    type Err = TopomapError;

    /// Exact names first, then a case-insensitive match.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        ALL.iter()
            .find(|c| c.name() == name)
            .or_else(|| ALL.iter().find(|c| c.name().eq_ignore_ascii_case(name)))
            .copied()
            .ok_or_else(|| {
                TopomapError::ConfigurationError(format!(
                    "Unknown colormap '{}'. Available: {}",
                    s,
                    Colormap::names().join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for cmap in Colormap::all() {
            assert_eq!(cmap.name().parse::<Colormap>().unwrap(), *cmap);
        }
        assert_eq!(Colormap::names().len(), 12);
        assert_eq!(Colormap::default().name(), "RdBu_r");
    }

    #[test]
    fn test_case_insensitive_parse() {
        assert_eq!("VIRIDIS".parse::<Colormap>().unwrap(), Colormap::Viridis);
        assert_eq!("reds".parse::<Colormap>().unwrap(), Colormap::Reds);
    }

    #[test]
    fn test_unknown_name() {
        let err = "rainbow".parse::<Colormap>().unwrap_err();
        assert!(matches!(err, TopomapError::ConfigurationError(_)));
        assert!(err.to_string().contains("RdBu_r"));
    }

    #[test]
    fn test_endpoints_match_stops() {
        assert_eq!(Colormap::Viridis.color(0.0), [0x44, 0x01, 0x54]);
        assert_eq!(Colormap::Viridis.color(1.0), [0xfd, 0xe7, 0x25]);
        assert_eq!(Colormap::RdBuR.color(0.5), [0xf7, 0xf7, 0xf7]);
        assert_eq!(Colormap::Jet.color(-3.0), Colormap::Jet.color(0.0));
        assert_eq!(Colormap::Jet.color(f64::NAN), Colormap::Jet.color(0.0));
    }

    #[test]
    fn test_sequential_maps_darken() {
        let lum = |c: [u8; 3]| c.iter().map(|&v| v as u32).sum::<u32>();
        let lut = Colormap::Blues.lut(16);
        assert_eq!(lut.len(), 16);
        assert!(lut.windows(2).all(|w| lum(w[0]) >= lum(w[1])));
    }
}
