//! Core error types for ARBOR.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A settings value is out of range
    #[error("Invalid setting {field}: {reason}")]
    InvalidSettings {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Reading or writing a file failed
    #[error("I/O error on {path}: {message}")]
    Io {
        /// File involved
        path: String,
        /// Error message
        message: String,
    },

    /// Parse error
    #[error("Parse error: {message}")]
    Parse {
        /// Error message
        message: String,
    },
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}
