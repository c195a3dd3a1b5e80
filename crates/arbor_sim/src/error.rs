//! Simulation errors.

use arbor_core::CoreError;
use arbor_runtime::EngineError;
use thiserror::Error;

/// Result type for simulation operations
pub type SimResult<T> = Result<T, SimError>;

/// Simulation errors
#[derive(Debug, Error)]
pub enum SimError {
    /// Model parameter out of range
    #[error("invalid model: {field}: {reason}")]
    InvalidModel {
        /// Offending field
        field: String,
        /// Why it is invalid
        reason: String,
    },

    /// Engine failure
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Settings or I/O failure
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SimError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidModel {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
