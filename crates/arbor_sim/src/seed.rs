//! Seeds for reproducible synthetic trees.
//!
//! A model seed is split into independent streams by hashing it together with
//! a context name and, for per-unit decisions, the unit's address.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Where a seed value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedSource {
    /// Given directly
    Literal(u64),
    /// Hash of a name, for seeds chosen by humans
    FromString(String),
    /// Fresh entropy; runs are not reproducible
    Random,
}

impl SeedSource {
    /// Resolve to a value
    #[must_use]
    pub fn to_seed(&self) -> u64 {
        match self {
            Self::Literal(value) => *value,
            Self::FromString(name) => {
                let mut hasher = fnv::FnvHasher::default();
                hasher.write(name.as_bytes());
                hasher.finish()
            }
            Self::Random => rand::random(),
        }
    }
}

/// A resolved seed and its origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSeed {
    /// Seed value
    pub seed: u64,
    /// Where the value came from
    pub source: SeedSource,
}

impl SimSeed {
    /// Resolve `source`
    #[must_use]
    pub fn new(source: SeedSource) -> Self {
        Self {
            seed: source.to_seed(),
            source,
        }
    }

    /// Seed with a known value
    #[must_use]
    pub fn from_literal(seed: u64) -> Self {
        Self::new(SeedSource::Literal(seed))
    }

    /// Seed named by a string
    #[must_use]
    pub fn from_string(name: impl Into<String>) -> Self {
        Self::new(SeedSource::FromString(name.into()))
    }

    /// Seed from fresh entropy
    #[must_use]
    pub fn random() -> Self {
        Self::new(SeedSource::Random)
    }

    fn child(&self, hasher: fnv::FnvHasher) -> Self {
        Self::from_literal(hasher.finish())
    }

    fn hasher(&self, context: &str) -> fnv::FnvHasher {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write_u64(self.seed);
        hasher.write(context.as_bytes());
        hasher
    }

    /// Independent seed for a named stream
    #[must_use]
    pub fn derive(&self, context: &str) -> Self {
        self.child(self.hasher(context))
    }

    /// Independent seed for one address within a named stream
    #[must_use]
    pub fn at(&self, context: &str, address: u64) -> Self {
        let mut hasher = self.hasher(context);
        hasher.write_u64(address);
        self.child(hasher)
    }

    /// Generator over this seed
    #[must_use]
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }
}

impl Default for SimSeed {
    fn default() -> Self {
        Self::from_literal(42)
    }
}
