//! Interfaces to the semantics layer.
//!
//! The engine never decides what an instruction does. A [`Semantics`]
//! implementation supplies states, operators, a solver, and the successors of
//! a path; an [`ExecutionUnit`] mutates a state through the operators.

use crate::path::Path;
use arbor_core::{Settings, Tag};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Operators that mutate a semantic state.
///
/// Each engine thread owns one operators object and installs a node's state
/// into it for the duration of that node's execution. Clearing the current
/// state while executing signals that execution failed.
pub trait RiscOperators {
    /// Semantic state type
    type State: Clone + Send + Sync + 'static;

    /// State currently installed, if any
    fn current_state(&self) -> Option<&Self::State>;

    /// Mutable access to the installed state
    fn current_state_mut(&mut self) -> Option<&mut Self::State>;

    /// Replace the installed state, returning the previous one
    fn set_current_state(&mut self, state: Option<Self::State>) -> Option<Self::State>;

    /// Whether a state is installed
    fn has_current_state(&self) -> bool {
        self.current_state().is_some()
    }

    /// Remove and return the installed state
    fn take_current_state(&mut self) -> Option<Self::State> {
        self.set_current_state(None)
    }
}

/// Constraint solver used to decide feasibility of successors.
///
/// Solvers are handles: clones refer to the same underlying solver, which is
/// how one gets attached to an operators object while a node executes.
pub trait Solver: Clone {
    /// Path-condition expression type
    type Expr;

    /// Discard all assertions and scopes
    fn reset(&mut self);

    /// Add assertions to the current scope
    fn insert(&mut self, assertions: &[Self::Expr]);

    /// Open a scope
    fn push(&mut self);

    /// Close the innermost scope, discarding its assertions
    fn pop(&mut self);
}

/// Solver scope that is closed when dropped
pub struct SolverTransaction<'a, V: Solver> {
    solver: &'a mut V,
}

impl<'a, V: Solver> SolverTransaction<'a, V> {
    /// Open a scope on `solver`
    pub fn new(solver: &'a mut V) -> Self {
        solver.push();
        Self { solver }
    }
}

impl<V: Solver> Deref for SolverTransaction<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        self.solver
    }
}

impl<V: Solver> DerefMut for SolverTransaction<'_, V> {
    fn deref_mut(&mut self) -> &mut V {
        self.solver
    }
}

impl<V: Solver> Drop for SolverTransaction<'_, V> {
    fn drop(&mut self) {
        self.solver.pop();
    }
}

/// An already-decoded chunk of program behavior, such as one basic block
pub trait ExecutionUnit<S: Semantics>: Send + Sync {
    /// Execute against the state installed in `ops`.
    ///
    /// Leaving `ops` without a current state marks the node as failed.
    fn execute(&self, settings: &Settings, semantics: &S, ops: &mut S::Operators) -> Vec<Tag>;

    /// Number of primitive steps this unit represents (at least one)
    fn n_steps(&self) -> usize;

    /// Starting address, if the unit has one
    fn address(&self) -> Option<u64>;

    /// Whether the unit contains an instruction the decoder did not recognise
    fn contains_unknown_insn(&self) -> bool {
        false
    }

    /// Name for diagnostics
    fn printable_name(&self) -> String;
}

/// Shared handle to an execution unit
pub type UnitRef<S> = Arc<dyn ExecutionUnit<S>>;

/// A successor of a path together with the condition for taking it
pub struct NextUnit<S: Semantics> {
    /// Unit to execute next
    pub unit: UnitRef<S>,
    /// Path-condition fragment gained by taking this successor
    pub assertion: S::Expr,
}

impl<S: Semantics> NextUnit<S> {
    /// Create a successor
    pub fn new(unit: UnitRef<S>, assertion: S::Expr) -> Self {
        Self { unit, assertion }
    }
}

impl<S: Semantics> fmt::Debug for NextUnit<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextUnit")
            .field("unit", &self.unit.printable_name())
            .field("assertion", &self.assertion)
            .finish()
    }
}

/// The semantics collaborator.
///
/// One instance is shared by every engine thread; per-thread operators and
/// solvers are created through it.
pub trait Semantics: Send + Sync + Sized + 'static {
    /// Semantic state type
    type State: Clone + Send + Sync + 'static;
    /// Path-condition expression type
    type Expr: Clone + fmt::Debug + Send + Sync + 'static;
    /// Thread-local operators
    type Operators: RiscOperators<State = Self::State>;
    /// Thread-local solver
    type Solver: Solver<Expr = Self::Expr>;

    /// Create operators with no state installed
    fn create_operators(&self) -> Self::Operators;

    /// Create a solver
    fn create_solver(&self) -> Self::Solver;

    /// Create the state a root path starts from
    fn create_initial_state(&self) -> Self::State;

    /// Finish initializing a root state already installed in `ops`
    fn initialize_state(&self, _ops: &mut Self::Operators) {}

    /// Instrumentation run before a unit executes
    fn pre_execute(&self, _unit: &dyn ExecutionUnit<Self>, _ops: &mut Self::Operators) -> Vec<Tag> {
        Vec::new()
    }

    /// Instrumentation run after a unit executes
    fn post_execute(&self, _unit: &dyn ExecutionUnit<Self>, _ops: &mut Self::Operators) -> Vec<Tag> {
        Vec::new()
    }

    /// Successors of `path`, whose outgoing state is installed in `ops`.
    ///
    /// `solver` already holds the path's assertions.
    fn next_units(
        &self,
        path: &Path<Self>,
        ops: &mut Self::Operators,
        solver: &mut Self::Solver,
    ) -> Vec<NextUnit<Self>>;

    /// Give the operators access to the engine's solver, or take it away
    fn attach_solver(&self, _ops: &mut Self::Operators, _solver: Option<Self::Solver>) {}

    /// Clear any statistics kept by the semantics layer
    fn reset(&self) {}

    /// Named counters for the statistics report
    fn counters(&self) -> Vec<(&'static str, usize)> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct DepthSolver {
        depth: usize,
        max_depth: usize,
    }

    impl Solver for DepthSolver {
        type Expr = ();

        fn reset(&mut self) {
            self.depth = 0;
        }

        fn insert(&mut self, _assertions: &[()]) {}

        fn push(&mut self) {
            self.depth += 1;
            self.max_depth = self.max_depth.max(self.depth);
        }

        fn pop(&mut self) {
            self.depth -= 1;
        }
    }

    #[test]
    fn test_solver_transaction_scopes() {
        let mut solver = DepthSolver::default();
        {
            let mut tx = SolverTransaction::new(&mut solver);
            assert_eq!(tx.depth, 1);
            {
                let tx2 = SolverTransaction::new(&mut *tx);
                assert_eq!(tx2.depth, 2);
            }
            assert_eq!(tx.depth, 1);
        }
        assert_eq!(solver.depth, 0);
        assert_eq!(solver.max_depth, 2);
    }
}
