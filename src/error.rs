//! Error types for the silhouette engine

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid configuration value: {field} - {message}")]
    Config { field: String, message: String },

    #[error("Missing required source: {0}")]
    MissingSource(&'static str),

    #[error("Invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Buffer size mismatch: got {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Resize failed: {0}")]
    Resize(String),
}

impl EngineError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Config {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Fails with `DimensionMismatch` unless both rasters share `expected`.
pub fn ensure_same_dimensions(expected: (u32, u32), actual: (u32, u32)) -> Result<()> {
    if expected != actual {
        return Err(EngineError::DimensionMismatch { expected, actual });
    }
    Ok(())
}
