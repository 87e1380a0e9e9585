use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopomapError {
    #[error("Failed to read input file: {0}")]
    FileReadError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No usable channels left, flagged: [{}]", .flagged.join(", "))]
    NoUsableChannels { flagged: Vec<String> },

    #[error("Spectral estimation failed: {0}")]
    SpectralEstimationError(String),

    #[error("Render failed: {0}")]
    RenderError(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Pipeline run was cancelled")]
    Cancelled,

    #[error("A pipeline run is already in progress")]
    Busy,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Coarse classification of a [`TopomapError`], stable for matching and serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    FileRead,
    UnsupportedFormat,
    NoUsableChannels,
    SpectralEstimation,
    Render,
    Configuration,
    Cancelled,
    Busy,
    Internal,
}

impl TopomapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TopomapError::FileReadError(_) | TopomapError::IoError(_) => ErrorKind::FileRead,
            TopomapError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            TopomapError::NoUsableChannels { .. } => ErrorKind::NoUsableChannels,
            TopomapError::SpectralEstimationError(_) => ErrorKind::SpectralEstimation,
            TopomapError::RenderError(_) => ErrorKind::Render,
            TopomapError::ConfigurationError(_) => ErrorKind::Configuration,
            TopomapError::Cancelled => ErrorKind::Cancelled,
            TopomapError::Busy => ErrorKind::Busy,
            TopomapError::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, TopomapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_usable_channels_lists_flagged() {
        let err = TopomapError::NoUsableChannels {
            flagged: vec!["Fp1".to_string(), "Cz".to_string()],
        };
        assert_eq!(err.to_string(), "No usable channels left, flagged: [Fp1, Cz]");
        assert_eq!(err.kind(), ErrorKind::NoUsableChannels);
    }

    #[test]
    fn test_io_error_maps_to_file_read() {
        let err: TopomapError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err.kind(), ErrorKind::FileRead);
    }
}
