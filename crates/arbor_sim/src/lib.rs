//! ARBOR Simulation
//!
//! A deterministic synthetic semantics for the exploration engine. Units form a
//! complete tree whose faults, failures, unknown instructions and infeasible
//! edges are derived from a seed, so runs are reproducible regardless of how
//! many threads explore the tree.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod harness;
pub mod model;
pub mod seed;
pub mod semantics;

pub use error::{SimError, SimResult};
pub use harness::{DEFAULT_SIM_K, InterestingPath, SimConfig, SimHarness, SimReport};
pub use model::{TreeModel, UnitBehavior};
pub use seed::{SeedSource, SimSeed};
pub use semantics::{Constraint, TreeOperators, TreeSemantics, TreeSolver, TreeState, TreeUnit};
