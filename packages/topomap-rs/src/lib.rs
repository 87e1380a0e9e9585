pub mod bands;
pub mod config;
pub mod error;
pub mod file_readers;
pub mod layout;
pub mod pipeline;
pub mod profiling;
pub mod quality;
pub mod render;
pub mod spectral;
pub mod types;

pub use bands::{aggregate_bands, check_band_coverage, AggregateOptions, BandPowerMap};
pub use config::{Band, RenderSettings, TopomapConfig};
pub use error::{ErrorKind, Result, TopomapError};
pub use file_readers::{load_recording, FileReaderFactory};
pub use layout::{resolve_layout, Montage, MontageName, SpatialLayout};
pub use pipeline::{
    Pipeline, PipelineEvent, PipelineFailure, PipelineOutput, ProgressObserver, RecordingSource,
    RunHandle, Stage, StatusLine, TopomapSession,
};
pub use quality::{ChannelQualityDetector, ChannelQualityMask, FlagReason};
pub use render::{ColorScale, Colormap, ImageFormat, RenderOptions, RenderResult, TopomapRenderer};
pub use spectral::{estimate_psd, Spectrum, WelchParams, WindowKind};
pub use types::{Annotation, ChannelKind, Recording, RecordingSummary};
