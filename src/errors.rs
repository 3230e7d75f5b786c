use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Error types for the orthophoto vegetation engine
#[derive(Error, Debug)]
pub enum OrthoError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    #[error("Cannot open raster {path}: {reason}")]
    RasterOpen {
        path: PathBuf,
        reason: String,
    },

    #[error("Cannot read polygon source {path}: {reason}")]
    PolygonSource {
        path: PathBuf,
        reason: String,
    },

    #[error("Cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Window read failed: {0}")]
    Read(String),

    #[error("Geometry out of bounds: {0}")]
    GeometryOutOfBounds(String),

    #[error("Coordinate space error: {0}")]
    CoordinateSpace(String),

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),

    #[error("Unexpected error: {0}")]
    Other(String),
}

impl OrthoError {
    /// Run-level errors that abort before any tile is scheduled
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrthoError::RasterOpen { .. }
                | OrthoError::PolygonSource { .. }
                | OrthoError::OutputDir { .. }
                | OrthoError::Config(_)
                | OrthoError::ConfigLoad { .. }
                | OrthoError::InvalidPath(_)
        )
    }
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, OrthoError>;
