//! One step of one candidate trace.
//!
//! A node owns the state flowing into and out of its execution unit. Nodes
//! form a tree through parent links; a child never outlives the `Arc` it holds
//! on its parent, and parents never point at children, so there are no cycles.

use crate::semantics::{ExecutionUnit, RiscOperators, Semantics, SolverTransaction, UnitRef};
use arbor_core::{NodeId, Settings, Tag};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Where the outgoing state of a successfully executed node is
enum Outgoing<T> {
    /// Held by the node
    Present(T),
    /// Lent out through a [`BorrowedState`]
    Lent,
    /// Handed to the children for good
    Released,
}

/// Execution outcome of a node
enum Resolution<T> {
    /// Not executed yet
    Pending,
    /// Executed successfully
    Succeeded(Outgoing<T>),
    /// Execution failed; the node has no outgoing state and no children
    Failed,
}

impl<T> Resolution<T> {
    fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Fields guarded by the node's lock
struct NodeInner<S: Semantics> {
    /// State handed in by the parent, consumed by the first execution
    incoming: Option<Arc<S::State>>,
    resolution: Resolution<S::State>,
    tags: Vec<Tag>,
    processing_time: Duration,
    sort_key: f64,
}

/// One execution step along a path
pub struct PathNode<S: Semantics> {
    id: NodeId,
    parent: Option<Arc<PathNode<S>>>,
    unit: UnitRef<S>,
    assertions: Vec<S::Expr>,
    /// Number of ancestors
    depth: usize,
    /// Steps from the root through this node
    total_steps: usize,
    /// Held for the whole of an execution so a node executes at most once
    execution: Mutex<()>,
    inner: Mutex<NodeInner<S>>,
}

impl<S: Semantics> PathNode<S> {
    /// Create a root node
    #[must_use]
    pub fn root(unit: UnitRef<S>) -> Arc<Self> {
        let total_steps = unit.n_steps();
        Arc::new(Self {
            id: NodeId::new(),
            parent: None,
            unit,
            assertions: Vec::new(),
            depth: 0,
            total_steps,
            execution: Mutex::new(()),
            inner: Mutex::new(NodeInner {
                incoming: None,
                resolution: Resolution::Pending,
                tags: Vec::new(),
                processing_time: Duration::ZERO,
                sort_key: 0.0,
            }),
        })
    }

    /// Create a child of `parent`.
    ///
    /// With `parent_outgoing` absent the child executes its parent on demand
    /// and starts from a copy of the parent's outgoing state.
    #[must_use]
    pub fn child(
        parent: Arc<Self>,
        unit: UnitRef<S>,
        assertion: S::Expr,
        parent_outgoing: Option<Arc<S::State>>,
    ) -> Arc<Self> {
        let total_steps = parent.total_steps + unit.n_steps();
        let depth = parent.depth + 1;
        Arc::new(Self {
            id: NodeId::new(),
            parent: Some(parent),
            unit,
            assertions: vec![assertion],
            depth,
            total_steps,
            execution: Mutex::new(()),
            inner: Mutex::new(NodeInner {
                incoming: parent_outgoing,
                resolution: Resolution::Pending,
                tags: Vec::new(),
                processing_time: Duration::ZERO,
                sort_key: 0.0,
            }),
        })
    }

    /// Diagnostic id
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Parent node, absent for roots
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<PathNode<S>>> {
        self.parent.as_ref()
    }

    /// Execution unit
    #[must_use]
    pub fn unit(&self) -> &UnitRef<S> {
        &self.unit
    }

    /// Number of primitive steps in this node's unit
    #[must_use]
    pub fn n_steps(&self) -> usize {
        self.unit.n_steps()
    }

    /// Steps from the root through this node
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Number of ancestors
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Address of the unit
    #[must_use]
    pub fn address(&self) -> Option<u64> {
        self.unit.address()
    }

    /// Name of the unit
    #[must_use]
    pub fn printable_name(&self) -> String {
        self.unit.printable_name()
    }

    /// Path-condition fragment gained at this node
    #[must_use]
    pub fn assertions(&self) -> Vec<S::Expr> {
        self.assertions.clone()
    }

    pub(crate) fn assertions_ref(&self) -> &[S::Expr] {
        &self.assertions
    }

    /// Key last assigned by a priority queue
    #[must_use]
    pub fn sort_key(&self) -> f64 {
        self.inner.lock().sort_key
    }

    /// Record the key assigned by a priority queue
    pub fn set_sort_key(&self, key: f64) {
        self.inner.lock().sort_key = key;
    }

    /// Copy of the tags gathered so far
    #[must_use]
    pub fn tags(&self) -> Vec<Tag> {
        self.inner.lock().tags.clone()
    }

    /// Number of tags
    #[must_use]
    pub fn n_tags(&self) -> usize {
        self.inner.lock().tags.len()
    }

    /// Add one tag
    pub fn append_tag(&self, tag: Tag) {
        self.inner.lock().tags.push(tag);
    }

    /// Add several tags
    pub fn append_tags(&self, tags: impl IntoIterator<Item = Tag>) {
        self.inner.lock().tags.extend(tags);
    }

    /// Time spent processing this node
    #[must_use]
    pub fn processing_time(&self) -> Duration {
        self.inner.lock().processing_time
    }

    /// Add to the processing time
    pub fn increment_processing_time(&self, elapsed: Duration) {
        self.inner.lock().processing_time += elapsed;
    }

    /// Whether execution has happened (successfully or not)
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.lock().resolution.is_resolved()
    }

    /// Whether execution failed
    #[must_use]
    pub fn execution_failed(&self) -> bool {
        matches!(self.inner.lock().resolution, Resolution::Failed)
    }

    /// Whether the node currently holds an outgoing state
    #[must_use]
    pub fn has_outgoing_state(&self) -> bool {
        matches!(
            self.inner.lock().resolution,
            Resolution::Succeeded(Outgoing::Present(_))
        )
    }

    /// Whether the outgoing state is currently lent out
    #[must_use]
    pub fn is_outgoing_state_borrowed(&self) -> bool {
        matches!(self.inner.lock().resolution, Resolution::Succeeded(Outgoing::Lent))
    }

    /// Clone of the outgoing state, if the node holds one
    #[must_use]
    pub fn copy_outgoing_state(&self) -> Option<S::State> {
        match &self.inner.lock().resolution {
            Resolution::Succeeded(Outgoing::Present(state)) => Some(state.clone()),
            _ => None,
        }
    }

    /// Take the outgoing state out of the node until the loan ends.
    ///
    /// Returns `None` unless the node executed successfully and currently
    /// holds its state.
    pub fn borrow_outgoing_state(&self) -> Option<BorrowedState<'_, S>> {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.resolution, Resolution::Succeeded(Outgoing::Lent)) {
            Resolution::Succeeded(Outgoing::Present(state)) => Some(BorrowedState {
                node: self,
                state: Some(state),
                settled: false,
            }),
            other => {
                inner.resolution = other;
                None
            }
        }
    }

    /// Discard the outgoing state for good
    pub fn release_outgoing_state(&self) {
        let mut inner = self.inner.lock();
        if let Resolution::Succeeded(outgoing) = &mut inner.resolution {
            *outgoing = Outgoing::Released;
        }
    }

    fn restore_outgoing_state(&self, state: S::State) {
        let mut inner = self.inner.lock();
        match &mut inner.resolution {
            Resolution::Succeeded(outgoing @ Outgoing::Lent) => *outgoing = Outgoing::Present(state),
            _ => debug!(node = %self.id, "outgoing state released while lent; dropping returned state"),
        }
    }

    fn finish_loan_without_state(&self) {
        let mut inner = self.inner.lock();
        if let Resolution::Succeeded(outgoing @ Outgoing::Lent) = &mut inner.resolution {
            *outgoing = Outgoing::Released;
        }
    }

    /// Execute this node's unit, at most once.
    ///
    /// The incoming state comes from the parent (cloned), or by executing the
    /// parent first when none was handed in, or from the semantics layer for
    /// roots. Later calls return immediately. Failure is recorded on the node,
    /// never returned.
    pub fn execute(
        &self,
        settings: &Settings,
        semantics: &S,
        ops: &mut S::Operators,
        solver: &mut S::Solver,
    ) {
        let _serial = self.execution.lock();

        let incoming = {
            let mut inner = self.inner.lock();
            if inner.resolution.is_resolved() {
                return;
            }
            if settings.reject_unknown_insns && self.unit.contains_unknown_insn() {
                debug!(node = %self.id, unit = %self.printable_name(), "contains not-allowed unknown instruction(s)");
                inner.incoming = None;
                inner.resolution = Resolution::Failed;
                return;
            }
            inner.incoming.take()
        };

        // The parent is executed with only our execution lock held, never our field lock.
        let (state, needs_initialization) = match incoming {
            Some(shared) => (Some(Arc::unwrap_or_clone(shared)), false),
            None => match &self.parent {
                Some(parent) => {
                    parent.execute(settings, semantics, ops, solver);
                    (parent.copy_outgoing_state(), false)
                }
                None => (Some(semantics.create_initial_state()), true),
            },
        };

        let mut tags = Vec::new();
        let outgoing = match state {
            None => {
                debug!(node = %self.id, "parent has no outgoing state");
                None
            }
            Some(state) => {
                let tx = SolverTransaction::new(solver);
                let mut scope = ExecutionScope::install(semantics, ops, state);
                if needs_initialization {
                    semantics.initialize_state(scope.ops);
                }
                semantics.attach_solver(scope.ops, Some((*tx).clone()));
                let unit: &dyn ExecutionUnit<S> = &*self.unit;

                if scope.ops.has_current_state() {
                    trace!(node = %self.id, "pre-execution semantics");
                    tags.extend(semantics.pre_execute(unit, scope.ops));
                }
                if scope.ops.has_current_state() {
                    tags.extend(unit.execute(settings, semantics, scope.ops));
                }
                if scope.ops.has_current_state() {
                    trace!(node = %self.id, "post-execution semantics");
                    tags.extend(semantics.post_execute(unit, scope.ops));
                }
                scope.finish()
            }
        };

        let mut inner = self.inner.lock();
        inner.tags.extend(tags);
        inner.resolution = match outgoing {
            Some(state) => Resolution::Succeeded(Outgoing::Present(state)),
            None => {
                debug!(node = %self.id, unit = %self.printable_name(), "execution failed");
                Resolution::Failed
            }
        };
    }
}

impl<S: Semantics> fmt::Debug for PathNode<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathNode")
            .field("id", &self.id)
            .field("unit", &self.printable_name())
            .field("depth", &self.depth)
            .field("total_steps", &self.total_steps)
            .finish_non_exhaustive()
    }
}

/// A node's state installed in a thread's operators for one execution.
///
/// Dropping the scope detaches the solver and clears the operators.
struct ExecutionScope<'a, S: Semantics> {
    semantics: &'a S,
    ops: &'a mut S::Operators,
}

impl<'a, S: Semantics> ExecutionScope<'a, S> {
    fn install(semantics: &'a S, ops: &'a mut S::Operators, state: S::State) -> Self {
        let stale = ops.set_current_state(Some(state));
        debug_assert!(stale.is_none(), "operators already had a current state");
        Self { semantics, ops }
    }

    /// End the scope, returning whatever state the operators still hold
    fn finish(self) -> Option<S::State> {
        self.ops.take_current_state()
    }
}

impl<S: Semantics> Drop for ExecutionScope<'_, S> {
    fn drop(&mut self) {
        self.semantics.attach_solver(self.ops, None);
        self.ops.set_current_state(None);
    }
}

/// Exclusive loan of a node's outgoing state.
///
/// The loan ends exactly once: [`restore`](Self::restore) (also what dropping
/// does) gives the state back, [`release`](Self::release) gives it away.
pub struct BorrowedState<'a, S: Semantics> {
    node: &'a PathNode<S>,
    state: Option<S::State>,
    settled: bool,
}

impl<S: Semantics> BorrowedState<'_, S> {
    /// The borrowed state
    #[must_use]
    pub fn state(&self) -> Option<&S::State> {
        self.state.as_ref()
    }

    /// Install a copy of the state into `ops` while `f` runs.
    ///
    /// Whatever `f` leaves in `ops` is discarded; the loan keeps the state it
    /// had before the call.
    pub fn lend_to<R>(&mut self, ops: &mut S::Operators, f: impl FnOnce(&mut S::Operators) -> R) -> R {
        let stale = ops.set_current_state(self.state.clone());
        debug_assert!(stale.is_none(), "operators already had a current state");
        let result = f(ops);
        ops.set_current_state(None);
        result
    }

    /// Give the state back to the node
    pub fn restore(self) {}

    /// End the loan without returning the state; the node keeps nothing.
    ///
    /// Returns a shared handle for seeding children.
    #[must_use]
    pub fn release(mut self) -> Option<Arc<S::State>> {
        self.settled = true;
        self.node.finish_loan_without_state();
        self.state.take().map(Arc::new)
    }
}

impl<S: Semantics> Drop for BorrowedState<'_, S> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match self.state.take() {
            Some(state) => self.node.restore_outgoing_state(state),
            None => self.node.finish_loan_without_state(),
        }
    }
}
