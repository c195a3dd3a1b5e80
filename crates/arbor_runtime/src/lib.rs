//! ARBOR Runtime
//!
//! Concurrent exploration of a tree of candidate execution paths.
//! The engine schedules work across threads, extends paths into children,
//! prunes them with admission predicates, and estimates the size of the tree.
//! What a step actually does is delegated to a [`Semantics`] implementation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod monitor;
pub mod node;
pub mod path;
pub mod predicate;
pub mod queue;
pub mod semantics;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use engine::{Engine, EngineError, EngineResult};
pub use monitor::{EngineStatistics, FanoutEstimator, FanoutLevel};
pub use node::{BorrowedState, PathNode};
pub use path::{Ancestors, Path};
pub use predicate::{Admission, AnyPath, HasFinalTags, NoPath, PathPredicate, WorkPredicate};
pub use queue::{FastestPathFirst, LongestPathFirst, PathPrioritizer, PathQueue, ShortestPathFirst};
pub use semantics::{
    ExecutionUnit, NextUnit, RiscOperators, Semantics, Solver, SolverTransaction, UnitRef,
};
pub use worker::{TransitionEffect, TransitionError, WorkCounters, WorkerState};
