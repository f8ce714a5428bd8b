//! Engine error types

use thiserror::Error;

/// Errors surfaced by station inference and the IO wrappers
///
/// Per-entity anomalies (no visits, missing stations) are not errors; they are
/// represented as empty or absent data in the reports.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Fewer distinct positions than the largest candidate station count
    #[error("insufficient data: required {required} distinct positions, actual {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("no samples provided")]
    EmptyInput,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl EngineError {
    pub fn insufficient_data(required: usize, actual: usize) -> Self {
        Self::InsufficientData { required, actual }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter { message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
