//! Result tags attached to path nodes during execution.

use serde::{Deserialize, Serialize};

/// Something noteworthy observed while executing a node, such as a fault
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Short machine-readable name
    pub name: String,
    /// Human-readable description
    pub message: String,
    /// Address where it was observed
    pub address: Option<u64>,
}

impl Tag {
    /// Create a new tag
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            address: None,
        }
    }

    /// Set the address
    #[must_use]
    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.address {
            Some(address) => write!(f, "{} at {:#x}: {}", self.name, address, self.message),
            None => write!(f, "{}: {}", self.name, self.message),
        }
    }
}
