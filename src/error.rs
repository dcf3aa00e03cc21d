//! Error types for the graincast model.

use thiserror::Error;

/// Result type for graincast operations.
pub type GraincastResult<T> = Result<T, GraincastError>;

/// Errors that can occur during model construction or forecasting.
///
/// Tensor-level failures from candle (shape mismatches during a forward
/// pass, device problems) are propagated unmodified. Configuration
/// problems are caught eagerly at construction time and never at
/// forward time.
#[derive(Debug, Error)]
pub enum GraincastError {
    /// Tensor operation failed
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Invalid configuration, rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Shape mismatch
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Config file serialization error
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl GraincastError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}
