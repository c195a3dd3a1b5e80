//! Exploration settings.
//!
//! The engine itself only reads `reject_unknown_insns`. The horizon and time
//! limit are consumed by admission predicates and by the statistics report.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Exploration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum path length in primitive steps
    pub k: usize,
    /// Maximum accumulated processing time per path, in seconds
    pub max_time: Option<f64>,
    /// Fail nodes whose unit contains an unknown instruction without executing them
    pub reject_unknown_insns: bool,
}

impl Settings {
    /// Default horizon in primitive steps
    pub const DEFAULT_K: usize = 1000;

    /// Create settings with default values
    #[must_use]
    pub fn new() -> Self {
        Self {
            k: Self::DEFAULT_K,
            max_time: None,
            reject_unknown_insns: true,
        }
    }

    /// Set the horizon
    #[must_use]
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Set the per-path time limit
    #[must_use]
    pub fn with_max_time(mut self, limit: Duration) -> Self {
        self.max_time = Some(limit.as_secs_f64());
        self
    }

    /// Enable/disable rejection of unknown instructions
    #[must_use]
    pub fn with_reject_unknown_insns(mut self, reject: bool) -> Self {
        self.reject_unknown_insns = reject;
        self
    }

    /// Per-path time limit as a duration
    #[must_use]
    pub fn max_time_limit(&self) -> Option<Duration> {
        self.max_time
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Check that all values are in range
    ///
    /// # Errors
    ///
    /// Returns error naming the first offending field
    pub fn validate(&self) -> CoreResult<()> {
        if self.k == 0 {
            return Err(CoreError::InvalidSettings {
                field: "k".to_string(),
                reason: "horizon must be at least one step".to_string(),
            });
        }
        if let Some(secs) = self.max_time {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(CoreError::InvalidSettings {
                    field: "max_time".to_string(),
                    reason: format!("{} is not a positive number of seconds", secs),
                });
            }
            if let Err(err) = Duration::try_from_secs_f64(secs) {
                return Err(CoreError::InvalidSettings {
                    field: "max_time".to_string(),
                    reason: format!("{} seconds: {}", secs, err),
                });
            }
        }
        Ok(())
    }

    /// Parse and validate settings from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or a value is out of range
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load settings from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| CoreError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_json(&text)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}
