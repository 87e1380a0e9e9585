use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use topomap_rs::{Band, ChannelKind, ColorScale, ImageFormat, TopomapConfig};

#[derive(Parser)]
#[command(
    name = "eeg-topomap",
    version,
    about = "Band-power scalp topography for EEG recordings",
    long_about = "Compute Welch band power per channel of an EDF/BDF recording and render\n\
                  one scalp map per frequency band (PNG, JPEG, TIFF, SVG or PDF)."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Render band-power topomaps for a recording
    Run(RunArgs),
    /// Show the header summary of a recording
    Info(InfoArgs),
    /// List available colormaps
    Colormaps(ColormapsArgs),
    /// List electrode positions of the standard 10-20 montage
    Montage(MontageArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Input recording (EDF or BDF)
    #[arg(long)]
    pub file: String,

    /// JSON configuration file; flags below override its fields
    #[arg(long, env = "TOPOMAP_CONFIG")]
    pub config: Option<String>,

    /// Colormap name (see `colormaps`)
    #[arg(long)]
    pub colormap: Option<String>,

    /// Lower edge of the analysed frequency range in Hz
    #[arg(long)]
    pub fmin: Option<f64>,

    /// Upper edge of the analysed frequency range in Hz
    #[arg(long)]
    pub fmax: Option<f64>,

    /// Standard deviation below which a channel counts as empty
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Express band power relative to total in-range power
    #[arg(long, default_value_t = false)]
    pub normalize: bool,

    /// Keep band power in linear units instead of dB
    #[arg(long, default_value_t = false)]
    pub no_db: bool,

    /// Use one colour range for all bands
    #[arg(long, default_value_t = false)]
    pub shared_scale: bool,

    /// Frequency bands as "name=low:high", replacing the defaults
    #[arg(long = "band", num_args = 1..)]
    pub bands: Vec<String>,

    /// Channel type to analyse (eeg, meg, ...)
    #[arg(long)]
    pub channel_type: Option<String>,

    /// JSON montage file used instead of the standard 10-20 positions
    #[arg(long)]
    pub montage_file: Option<String>,

    /// Interpolation grid size per panel
    #[arg(long)]
    pub resolution: Option<usize>,

    /// Output resolution in dots per inch
    #[arg(long)]
    pub dpi: Option<u32>,

    /// Figure path; the extension picks the format (default: <input>-topomap.png)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Print a JSON run summary on stdout
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Input recording (EDF or BDF)
    #[arg(long)]
    pub file: String,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct ColormapsArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct MontageArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Build the run configuration: config file (or defaults), then flag overrides.
pub fn build_config(args: &RunArgs) -> Result<TopomapConfig, String> {
    let mut config = match &args.config {
        Some(path) => TopomapConfig::from_json_file(Path::new(path)).map_err(|e| e.to_string())?,
        None => TopomapConfig::default(),
    };

    if let Some(ref name) = args.colormap {
        config.colormap = name.clone();
    }
    if let Some(fmin) = args.fmin {
        config.frequency_range.0 = fmin;
    }
    if let Some(fmax) = args.fmax {
        config.frequency_range.1 = fmax;
    }
    if let Some(threshold) = args.threshold {
        config.empty_channel_threshold = threshold;
    }
    if args.normalize {
        config.normalize = true;
    }
    if args.no_db {
        config.db_scale = false;
    }
    if args.shared_scale {
        config.color_scale = ColorScale::Shared;
    }
    if !args.bands.is_empty() {
        config.bands = args
            .bands
            .iter()
            .map(|spec| Band::parse(spec))
            .collect::<topomap_rs::Result<Vec<_>>>()
            .map_err(|e| e.to_string())?;
    }
    if let Some(ref kind) = args.channel_type {
        config.channel_type = kind.parse::<ChannelKind>().map_err(|e| e.to_string())?;
    }
    if let Some(resolution) = args.resolution {
        config.render.resolution = resolution;
    }
    if let Some(dpi) = args.dpi {
        config.render.dpi = dpi;
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// `<dir>/<stem>-topomap.png` next to the input file.
pub fn default_output_path(input: &str) -> PathBuf {
    let input = Path::new(input);
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("recording");
    input.with_file_name(format!("{}-topomap.png", stem))
}

/// Figure path and the format implied by its extension.
pub fn resolve_output(args: &RunArgs) -> Result<(PathBuf, ImageFormat), String> {
    let path = args
        .output
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output_path(&args.file));
    let format = ImageFormat::from_path(&path).map_err(|e| e.to_string())?;
    Ok((path, format))
}
