//! Worker lifecycle bookkeeping.
//!
//! Every thread that does engine work, managed or not, moves through
//! `Starting -> {Waiting | Working} -> Finished` with `Waiting <-> Working` in
//! between. The engine keeps two counters that the transitions maintain:
//! threads able to work (capacity) and threads currently working.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Lifecycle state of one thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WorkerState {
    /// Not yet counted, or counted but not yet waiting
    Starting,
    /// Waiting for work
    Waiting,
    /// Executing a step
    Working,
    /// Done; no further transitions
    Finished,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Waiting => "waiting",
            Self::Working => "working",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// A transition the state machine does not allow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The edge does not exist
    #[error("invalid worker transition: {from} -> {to}")]
    Invalid {
        /// Current state
        from: WorkerState,
        /// Requested state
        to: WorkerState,
    },

    /// The edge exists but the counters say it cannot happen now
    #[error("worker transition {from} -> {to} with capacity {capacity} and {working} working")]
    Counters {
        /// Current state
        from: WorkerState,
        /// Requested state
        to: WorkerState,
        /// Work capacity at the time
        capacity: usize,
        /// Working threads at the time
        working: usize,
    },
}

/// Side effect of a transition the engine must act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    /// Counters changed (or not) with nothing else to do
    None,
    /// Capacity grew by one
    Started,
    /// Capacity shrank by one
    Finished,
}

/// Capacity and working counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkCounters {
    /// Threads able to work
    pub capacity: usize,
    /// Threads currently working
    pub working: usize,
}

impl WorkCounters {
    /// Apply the transition `from -> to`.
    ///
    /// The counters are left untouched when the transition is refused.
    ///
    /// # Errors
    ///
    /// Returns error if the edge is invalid or the counters forbid it
    pub fn transition(&mut self, from: WorkerState, to: WorkerState) -> Result<TransitionEffect, TransitionError> {
        use WorkerState::{Finished, Starting, Waiting, Working};

        let invalid = || TransitionError::Invalid { from, to };
        let counters = |c: &Self| TransitionError::Counters {
            from,
            to,
            capacity: c.capacity,
            working: c.working,
        };

        match (from, to) {
            (Finished, _) | (Waiting, Starting) | (Working, Starting) | (Working, Working) => Err(invalid()),

            (Starting, Starting) => {
                self.capacity += 1;
                Ok(TransitionEffect::Started)
            }

            (Starting | Waiting, Waiting) => {
                if self.capacity == 0 {
                    return Err(counters(self));
                }
                Ok(TransitionEffect::None)
            }

            (Starting | Waiting, Working) => {
                if self.working >= self.capacity {
                    return Err(counters(self));
                }
                self.working += 1;
                Ok(TransitionEffect::None)
            }

            (Starting | Waiting, Finished) => {
                if self.capacity == 0 || self.working >= self.capacity {
                    return Err(counters(self));
                }
                self.capacity -= 1;
                Ok(TransitionEffect::Finished)
            }

            (Working, Waiting) => {
                if self.capacity == 0 || self.working == 0 {
                    return Err(counters(self));
                }
                self.working -= 1;
                Ok(TransitionEffect::None)
            }

            (Working, Finished) => {
                if self.capacity == 0 || self.working == 0 {
                    return Err(counters(self));
                }
                self.working -= 1;
                self.capacity -= 1;
                Ok(TransitionEffect::Finished)
            }
        }
    }
}
