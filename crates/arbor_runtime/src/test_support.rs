//! Deterministic stub semantics for engine tests.
//!
//! The tree is named by unit: the root is `A`, its children are `B`, `C`, ...
//! and every other node's children append a letter to the parent's name, so
//! `B` has children `BB`, `BC`, ... Each unit is one step.

use crate::path::Path;
use crate::semantics::{ExecutionUnit, NextUnit, RiscOperators, Semantics, Solver};
use arbor_core::{Settings, Tag};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StubState {
    pub trace: Vec<String>,
}

#[derive(Default)]
pub struct StubOps {
    state: Option<StubState>,
    solver: Option<StubSolver>,
}

impl StubOps {
    pub fn has_solver(&self) -> bool {
        self.solver.is_some()
    }
}

impl RiscOperators for StubOps {
    type State = StubState;

    fn current_state(&self) -> Option<&StubState> {
        self.state.as_ref()
    }

    fn current_state_mut(&mut self) -> Option<&mut StubState> {
        self.state.as_mut()
    }

    fn set_current_state(&mut self, state: Option<StubState>) -> Option<StubState> {
        std::mem::replace(&mut self.state, state)
    }
}

#[derive(Debug, Default)]
struct SolverLog {
    depth: usize,
    max_depth: usize,
    assertions: Vec<String>,
}

/// Shared handle; clones observe the same log
#[derive(Debug, Clone, Default)]
pub struct StubSolver {
    log: Arc<Mutex<SolverLog>>,
}

impl StubSolver {
    pub fn depth(&self) -> usize {
        self.log.lock().depth
    }

    pub fn max_depth(&self) -> usize {
        self.log.lock().max_depth
    }

    pub fn assertions(&self) -> Vec<String> {
        self.log.lock().assertions.clone()
    }
}

impl Solver for StubSolver {
    type Expr = String;

    fn reset(&mut self) {
        let mut log = self.log.lock();
        log.depth = 0;
        log.assertions.clear();
    }

    fn insert(&mut self, assertions: &[String]) {
        self.log.lock().assertions.extend_from_slice(assertions);
    }

    fn push(&mut self) {
        let mut log = self.log.lock();
        log.depth += 1;
        log.max_depth = log.max_depth.max(log.depth);
    }

    fn pop(&mut self) {
        let mut log = self.log.lock();
        log.depth = log.depth.saturating_sub(1);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Behavior {
    fail: bool,
    tag: bool,
    unknown: bool,
    delay: Option<Duration>,
}

pub struct StubUnit {
    name: String,
    behavior: Behavior,
    executions: AtomicUsize,
}

impl StubUnit {
    fn build(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            executions: AtomicUsize::new(0),
        })
    }

    pub fn new(name: &str) -> Arc<Self> {
        Self::build(name, Behavior::default())
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Self::build(name, Behavior { fail: true, ..Behavior::default() })
    }

    pub fn tagged(name: &str) -> Arc<Self> {
        Self::build(name, Behavior { tag: true, ..Behavior::default() })
    }

    pub fn unknown(name: &str) -> Arc<Self> {
        Self::build(name, Behavior { unknown: true, ..Behavior::default() })
    }

    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Self::build(name, Behavior { delay: Some(delay), ..Behavior::default() })
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl ExecutionUnit<StubSemantics> for StubUnit {
    fn execute(&self, _settings: &Settings, _semantics: &StubSemantics, ops: &mut StubOps) -> Vec<Tag> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        assert!(ops.has_solver(), "solver not attached during execution");
        if let Some(delay) = self.behavior.delay {
            std::thread::sleep(delay);
        }
        if self.behavior.fail {
            ops.set_current_state(None);
            return Vec::new();
        }
        if let Some(state) = ops.current_state_mut() {
            state.trace.push(self.name.clone());
        }
        if self.behavior.tag {
            vec![Tag::new("fault", format!("fault in {}", self.name))]
        } else {
            Vec::new()
        }
    }

    fn n_steps(&self) -> usize {
        1
    }

    fn address(&self) -> Option<u64> {
        None
    }

    fn contains_unknown_insn(&self) -> bool {
        self.behavior.unknown
    }

    fn printable_name(&self) -> String {
        self.name.clone()
    }
}

pub struct StubSemantics {
    branching: usize,
    instrumentation_tags: bool,
    takes_state: bool,
    failing: HashSet<String>,
    tagged: HashSet<String>,
    unknown: HashSet<String>,
    delay: Option<Duration>,
    units: Mutex<Vec<Arc<StubUnit>>>,
    next_units_calls: AtomicUsize,
    assertions_mismatch: AtomicBool,
}

impl StubSemantics {
    pub fn new(branching: usize) -> Self {
        Self {
            branching,
            instrumentation_tags: false,
            takes_state: false,
            failing: HashSet::new(),
            tagged: HashSet::new(),
            unknown: HashSet::new(),
            delay: None,
            units: Mutex::new(Vec::new()),
            next_units_calls: AtomicUsize::new(0),
            assertions_mismatch: AtomicBool::new(false),
        }
    }

    pub fn with_instrumentation_tags(mut self) -> Self {
        self.instrumentation_tags = true;
        self
    }

    /// Successor queries remove the state from the operators
    pub fn with_state_taken_by_next_units(mut self) -> Self {
        self.takes_state = true;
        self
    }

    pub fn with_failing<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.failing.extend(names.into_iter().map(str::to_string));
        self
    }

    pub fn with_tagged<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.tagged.extend(names.into_iter().map(str::to_string));
        self
    }

    pub fn with_unknown<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.unknown.extend(names.into_iter().map(str::to_string));
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Create and register the unit called `name`
    pub fn unit(&self, name: &str) -> Arc<StubUnit> {
        let behavior = Behavior {
            fail: self.failing.contains(name),
            tag: self.tagged.contains(name),
            unknown: self.unknown.contains(name),
            delay: self.delay,
        };
        let unit = StubUnit::build(name, behavior);
        self.units.lock().push(unit.clone());
        unit
    }

    pub fn root_path(&self) -> Path<Self> {
        Path::root(self.unit("A"))
    }

    pub fn units_created(&self) -> usize {
        self.units.lock().len()
    }

    pub fn executions_of(&self, name: &str) -> usize {
        self.units
            .lock()
            .iter()
            .filter(|unit| unit.name == name)
            .map(|unit| unit.executions())
            .sum()
    }

    pub fn max_executions(&self) -> usize {
        self.units.lock().iter().map(|unit| unit.executions()).max().unwrap_or(0)
    }

    pub fn total_executions(&self) -> usize {
        self.units.lock().iter().map(|unit| unit.executions()).sum()
    }

    pub fn next_units_calls(&self) -> usize {
        self.next_units_calls.load(Ordering::SeqCst)
    }

    pub fn assertions_consistent(&self) -> bool {
        !self.assertions_mismatch.load(Ordering::SeqCst)
    }

    fn child_name(parent: &str, index: usize) -> String {
        let letter = char::from(b'B' + index as u8);
        if parent == "A" {
            letter.to_string()
        } else {
            format!("{}{}", parent, letter)
        }
    }
}

impl Semantics for StubSemantics {
    type State = StubState;
    type Expr = String;
    type Operators = StubOps;
    type Solver = StubSolver;

    fn create_operators(&self) -> StubOps {
        StubOps::default()
    }

    fn create_solver(&self) -> StubSolver {
        StubSolver::default()
    }

    fn create_initial_state(&self) -> StubState {
        StubState::default()
    }

    fn pre_execute(&self, _unit: &dyn ExecutionUnit<Self>, _ops: &mut StubOps) -> Vec<Tag> {
        if self.instrumentation_tags {
            vec![Tag::new("pre", "before")]
        } else {
            Vec::new()
        }
    }

    fn post_execute(&self, _unit: &dyn ExecutionUnit<Self>, _ops: &mut StubOps) -> Vec<Tag> {
        if self.instrumentation_tags {
            vec![Tag::new("post", "after")]
        } else {
            Vec::new()
        }
    }

    fn next_units(&self, path: &Path<Self>, ops: &mut StubOps, solver: &mut StubSolver) -> Vec<NextUnit<Self>> {
        self.next_units_calls.fetch_add(1, Ordering::SeqCst);
        if solver.assertions() != path.assertions() || !ops.has_current_state() {
            self.assertions_mismatch.store(true, Ordering::SeqCst);
        }
        if self.takes_state {
            ops.take_current_state();
        }
        let parent = path.last_node().printable_name();
        (0..self.branching)
            .map(|index| {
                let name = Self::child_name(&parent, index);
                let assertion = format!("{}->{}", parent, name);
                NextUnit::new(self.unit(&name), assertion)
            })
            .collect()
    }

    fn attach_solver(&self, ops: &mut StubOps, solver: Option<StubSolver>) {
        ops.solver = solver;
    }

    fn reset(&self) {
        self.next_units_calls.store(0, Ordering::SeqCst);
    }

    fn counters(&self) -> Vec<(&'static str, usize)> {
        vec![("successor queries", self.next_units_calls())]
    }
}
