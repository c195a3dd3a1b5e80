//! Semantics collaborator for the synthetic tree.

use crate::error::SimResult;
use crate::model::{TreeModel, UnitBehavior};
use arbor_core::{Settings, Tag};
use arbor_runtime::{ExecutionUnit, NextUnit, Path, RiscOperators, Semantics, Solver, SolverTransaction, UnitRef};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

/// State carried along a path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeState {
    /// Addresses executed so far, root first
    pub visited: Vec<u64>,
    /// Primitive steps executed so far
    pub steps: usize,
}

/// Thread-local operators
#[derive(Debug, Default)]
pub struct TreeOperators {
    state: Option<TreeState>,
    solver: Option<TreeSolver>,
}

impl TreeOperators {
    /// Solver attached for the current execution, if any
    #[must_use]
    pub fn solver(&self) -> Option<&TreeSolver> {
        self.solver.as_ref()
    }
}

impl RiscOperators for TreeOperators {
    type State = TreeState;

    fn current_state(&self) -> Option<&TreeState> {
        self.state.as_ref()
    }

    fn current_state_mut(&mut self) -> Option<&mut TreeState> {
        self.state.as_mut()
    }

    fn set_current_state(&mut self, state: Option<TreeState>) -> Option<TreeState> {
        std::mem::replace(&mut self.state, state)
    }
}

/// Condition for taking the edge `parent -> child`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Constraint {
    /// Address of the parent unit
    pub parent: u64,
    /// Address of the child unit
    pub child: u64,
    /// Whether the edge can be taken
    pub feasible: bool,
}

#[derive(Debug, Default)]
struct SolverInner {
    assertions: Vec<Constraint>,
    scopes: Vec<usize>,
    checks: usize,
}

/// Solver over edge constraints; satisfiable when every edge is feasible.
///
/// Clones share one assertion stack.
#[derive(Debug, Clone, Default)]
pub struct TreeSolver {
    inner: Arc<Mutex<SolverInner>>,
}

impl TreeSolver {
    /// Whether the current assertions are satisfiable
    pub fn check(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.checks += 1;
        inner.assertions.iter().all(|c| c.feasible)
    }

    /// Assertions currently held
    #[must_use]
    pub fn assertions(&self) -> Vec<Constraint> {
        self.inner.lock().assertions.clone()
    }

    /// Open scopes
    #[must_use]
    pub fn n_scopes(&self) -> usize {
        self.inner.lock().scopes.len()
    }

    /// Checks made through any handle
    #[must_use]
    pub fn n_checks(&self) -> usize {
        self.inner.lock().checks
    }
}

impl Solver for TreeSolver {
    type Expr = Constraint;

    fn reset(&mut self) {
        let mut inner = self.inner.lock();
        inner.assertions.clear();
        inner.scopes.clear();
    }

    fn insert(&mut self, assertions: &[Constraint]) {
        self.inner.lock().assertions.extend_from_slice(assertions);
    }

    fn push(&mut self) {
        let mut inner = self.inner.lock();
        let mark = inner.assertions.len();
        inner.scopes.push(mark);
    }

    fn pop(&mut self) {
        let mut inner = self.inner.lock();
        if let Some(mark) = inner.scopes.pop() {
            inner.assertions.truncate(mark);
        }
    }
}

/// One position in the tree
#[derive(Debug)]
pub struct TreeUnit {
    address: u64,
    steps: usize,
    behavior: UnitBehavior,
}

impl TreeUnit {
    /// What executing this unit does
    #[must_use]
    pub fn behavior(&self) -> UnitBehavior {
        self.behavior
    }
}

impl ExecutionUnit<TreeSemantics> for TreeUnit {
    fn execute(&self, _settings: &Settings, semantics: &TreeSemantics, ops: &mut TreeOperators) -> Vec<Tag> {
        semantics.executions.fetch_add(1, Ordering::Relaxed);
        if self.behavior.fails {
            trace!(address = self.address, "unit failed");
            ops.set_current_state(None);
            return Vec::new();
        }
        let Some(state) = ops.current_state_mut() else {
            return Vec::new();
        };
        state.visited.push(self.address);
        state.steps += self.steps;

        if self.behavior.fault {
            let message = format!("fault after {} steps", state.steps);
            vec![Tag::new("fault", message).with_address(self.address)]
        } else {
            Vec::new()
        }
    }

    fn n_steps(&self) -> usize {
        self.steps
    }

    fn address(&self) -> Option<u64> {
        Some(self.address)
    }

    fn contains_unknown_insn(&self) -> bool {
        self.behavior.unknown
    }

    fn printable_name(&self) -> String {
        format!("unit {:#x}", self.address)
    }
}

/// Deterministic semantics over a [`TreeModel`]
#[derive(Debug)]
pub struct TreeSemantics {
    model: TreeModel,
    executions: AtomicUsize,
    solver_checks: AtomicUsize,
    solver_failures: AtomicUsize,
}

impl TreeSemantics {
    /// Create semantics for `model`
    ///
    /// # Errors
    ///
    /// Returns error if the model is out of range
    pub fn new(model: TreeModel) -> SimResult<Self> {
        model.validate()?;
        Ok(Self {
            model,
            executions: AtomicUsize::new(0),
            solver_checks: AtomicUsize::new(0),
            solver_failures: AtomicUsize::new(0),
        })
    }

    /// The model
    #[must_use]
    pub fn model(&self) -> &TreeModel {
        &self.model
    }

    /// The unit at `address`
    #[must_use]
    pub fn unit(&self, address: u64) -> UnitRef<Self> {
        Arc::new(TreeUnit {
            address,
            steps: self.model.steps_per_unit,
            behavior: self.model.behavior(address),
        })
    }

    /// The unit at the root of the tree
    #[must_use]
    pub fn root_unit(&self) -> UnitRef<Self> {
        self.unit(0)
    }

    /// Units executed
    #[must_use]
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::Relaxed)
    }

    /// Feasibility checks made
    #[must_use]
    pub fn solver_checks(&self) -> usize {
        self.solver_checks.load(Ordering::Relaxed)
    }

    /// Successors dropped as infeasible
    #[must_use]
    pub fn solver_failures(&self) -> usize {
        self.solver_failures.load(Ordering::Relaxed)
    }
}

impl Semantics for TreeSemantics {
    type State = TreeState;
    type Expr = Constraint;
    type Operators = TreeOperators;
    type Solver = TreeSolver;

    fn create_operators(&self) -> TreeOperators {
        TreeOperators::default()
    }

    fn create_solver(&self) -> TreeSolver {
        TreeSolver::default()
    }

    fn create_initial_state(&self) -> TreeState {
        TreeState::default()
    }

    fn next_units(&self, path: &Path<Self>, _ops: &mut TreeOperators, solver: &mut TreeSolver) -> Vec<NextUnit<Self>> {
        let Some(parent) = path.last_node().address() else {
            return Vec::new();
        };

        let mut next = Vec::with_capacity(self.model.branching);
        for index in 0..self.model.branching {
            let child = self.model.child_address(parent, index);
            let constraint = Constraint {
                parent,
                child,
                feasible: !self.model.infeasible(child),
            };

            let feasible = {
                let mut tx = SolverTransaction::new(solver);
                tx.insert(std::slice::from_ref(&constraint));
                self.solver_checks.fetch_add(1, Ordering::Relaxed);
                tx.check()
            };
            if feasible {
                next.push(NextUnit::new(self.unit(child), constraint));
            } else {
                debug!(parent, child, "infeasible successor dropped");
                self.solver_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        next
    }

    fn attach_solver(&self, ops: &mut TreeOperators, solver: Option<TreeSolver>) {
        ops.solver = solver;
    }

    fn reset(&self) {
        self.executions.store(0, Ordering::Relaxed);
        self.solver_checks.store(0, Ordering::Relaxed);
        self.solver_failures.store(0, Ordering::Relaxed);
    }

    fn counters(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("units executed", self.executions()),
            ("solver checks", self.solver_checks()),
            ("paths terminated for solver failure", self.solver_failures()),
        ]
    }
}
