//! The exploration engine.
//!
//! Worker threads repeatedly take the best path from the frontier, execute its
//! last node, offer the result to the interesting queue, and extend the path
//! by every successor the semantics layer reports. Managed workers are
//! spawned by [`Engine::start_workers`]; any other thread may join in through
//! [`Engine::step`] or [`Engine::run`].
//!
//! One engine lock guards the counters, the predicates, the settings and the
//! statistics. Queue inserts happen under it so waiting threads never miss a
//! wakeup. Predicates are evaluated outside it.

use crate::monitor::{EngineStatistics, FanoutEstimator};
use crate::path::Path;
use crate::predicate::{HasFinalTags, PathPredicate, WorkPredicate};
use crate::queue::{LongestPathFirst, PathPrioritizer, PathQueue, ShortestPathFirst};
use crate::semantics::{Semantics, Solver, UnitRef};
use crate::worker::{TransitionEffect, WorkCounters, WorkerState};
use arbor_core::{CoreError, Settings, Stopwatch};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, trace};

/// Fallback pool size when the hardware parallelism is unknown
const DEFAULT_WORKERS: usize = 4;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation needs every thread to be idle
    #[error("engine is busy: {working} working of {capacity} threads")]
    Busy {
        /// Threads able to work
        capacity: usize,
        /// Threads working
        working: usize,
    },

    /// The OS refused to create a worker thread
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    /// Invalid settings
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Fields guarded by the engine lock
struct EngineState<S: Semantics> {
    settings: Arc<Settings>,
    frontier_predicate: Arc<dyn PathPredicate<S>>,
    interesting_predicate: Arc<dyn PathPredicate<S>>,
    counters: WorkCounters,
    stopping: bool,
    /// Bumped by every stop so waiters can tell one happened
    stop_generation: u64,
    paths_explored: usize,
    steps_explored: usize,
    fanout: FanoutEstimator,
    elapsed: Stopwatch,
    since_report: Stopwatch,
    paths_at_last_report: usize,
}

/// State shared between the engine handle and its workers
struct Shared<S: Semantics> {
    semantics: Arc<S>,
    state: Mutex<EngineState<S>>,
    new_work: Condvar,
    new_interesting: Condvar,
    frontier: PathQueue<S>,
    interesting: PathQueue<S>,
}

/// Per-thread operators and solver, reused across steps
struct ThreadContext<S: Semantics> {
    ops: S::Operators,
    solver: S::Solver,
}

impl<S: Semantics> ThreadContext<S> {
    fn new(semantics: &S) -> Self {
        Self {
            ops: semantics.create_operators(),
            solver: semantics.create_solver(),
        }
    }
}

/// Lifecycle of one thread doing engine work; finishing happens on drop
struct WorkerGuard<'a, S: Semantics> {
    shared: &'a Shared<S>,
    state: WorkerState,
}

impl<'a, S: Semantics> WorkerGuard<'a, S> {
    /// Count a new thread
    fn start(shared: &'a Shared<S>) -> Self {
        let mut guard = Self {
            shared,
            state: WorkerState::Starting,
        };
        guard.change(WorkerState::Starting);
        guard
    }

    /// Take over a thread already counted by `start_workers`
    fn adopt(shared: &'a Shared<S>) -> Self {
        Self {
            shared,
            state: WorkerState::Starting,
        }
    }

    fn change(&mut self, next: WorkerState) {
        let mut state = self.shared.state.lock();
        self.shared.change_state_locked(&mut state, &mut self.state, next);
    }

    /// Take work if there is some right now and no stop happened after `generation`
    fn take_next_work_now(&mut self, generation: Option<u64>) -> Option<Path<S>> {
        let mut state = self.shared.state.lock();
        if state.stopping || generation.is_some_and(|generation| generation != state.stop_generation) {
            return None;
        }
        let path = self.shared.frontier.take_next()?;
        self.shared.change_state_locked(&mut state, &mut self.state, WorkerState::Working);
        Some(path)
    }

    /// Wait for work; `None` once nothing can produce more or a stop is requested
    fn take_next_work(&mut self) -> Option<Path<S>> {
        let mut state = self.shared.state.lock();
        loop {
            if state.stopping {
                return None;
            }
            if let Some(path) = self.shared.frontier.take_next() {
                self.shared.change_state_locked(&mut state, &mut self.state, WorkerState::Working);
                return Some(path);
            }
            if state.counters.working == 0 {
                return None;
            }
            self.shared.new_work.wait(&mut state);
        }
    }
}

impl<S: Semantics> Drop for WorkerGuard<'_, S> {
    fn drop(&mut self) {
        self.change(WorkerState::Finished);
    }
}

impl<S: Semantics> Shared<S> {
    fn change_state_locked(&self, state: &mut EngineState<S>, current: &mut WorkerState, next: WorkerState) {
        let from = *current;
        match state.counters.transition(from, next) {
            Ok(effect) => {
                match effect {
                    TransitionEffect::Started => {
                        if !state.elapsed.is_running() {
                            state.elapsed.restart();
                        }
                    }
                    TransitionEffect::Finished => {
                        self.new_work.notify_all();
                        self.new_interesting.notify_all();
                    }
                    TransitionEffect::None => {}
                }
                if from == WorkerState::Working && state.counters.working == 0 {
                    self.new_work.notify_all();
                }
                *current = next;
            }
            Err(err) => {
                error!(%err, "worker state machine violated");
                if cfg!(debug_assertions) {
                    panic!("{}", err);
                }
            }
        }
    }

    fn settings(&self) -> Arc<Settings> {
        self.state.lock().settings.clone()
    }

    fn insert_work(&self, path: Path<S>) -> bool {
        let (settings, predicate) = {
            let state = self.state.lock();
            (state.settings.clone(), state.frontier_predicate.clone())
        };
        let admission = predicate.test(&settings, &path);
        if admission.accepted {
            debug!(reason = %admission.reason, path = %path.printable_name(), "inserted work");
            let _state = self.state.lock();
            self.frontier.insert(path);
            self.new_work.notify_one();
            true
        } else {
            debug!(reason = %admission.reason, path = %path.printable_name(), "rejected work");
            false
        }
    }

    fn insert_interesting(&self, path: &Path<S>) -> bool {
        let (settings, predicate) = {
            let state = self.state.lock();
            (state.settings.clone(), state.interesting_predicate.clone())
        };
        let admission = predicate.test(&settings, path);
        if admission.accepted {
            debug!(reason = %admission.reason, path = %path.printable_name(), "interesting");
            let _state = self.state.lock();
            self.interesting.insert(path.clone());
            self.new_interesting.notify_one();
            true
        } else {
            debug!(reason = %admission.reason, path = %path.printable_name(), "uninteresting");
            false
        }
    }

    /// Execute the path's last node and offer it to the interesting queue
    fn execute(&self, path: &Path<S>, context: &mut ThreadContext<S>) {
        trace!(path = %path.printable_name(), "current path");
        let last = path.last_node();
        let settings = {
            let mut state = self.state.lock();
            state.paths_explored += 1;
            state.steps_explored += last.n_steps();
            state.settings.clone()
        };
        last.execute(&settings, &self.semantics, &mut context.ops, &mut context.solver);
        self.insert_interesting(path);
    }

    /// Queue one child per successor and record the fanout
    fn extend(&self, path: &Path<S>, context: &mut ThreadContext<S>) {
        let last = path.last_node();
        let mut n_children = 0;

        if path.execution_failed() {
            debug!(path = %path.printable_name(), "execution failure; no extension possible");
        } else if let Some(mut borrowed) = last.borrow_outgoing_state() {
            let ThreadContext { ops, solver } = context;
            solver.reset();
            solver.insert(&path.assertions());
            let semantics = &*self.semantics;
            let next_units = borrowed.lend_to(ops, |ops| semantics.next_units(path, ops, solver));

            // Every child starts from the same shared handle and clones it on execution.
            let outgoing = borrowed.release();
            for next in next_units {
                let child = Path::child(path, next.unit, next.assertion, outgoing.clone());
                if self.insert_work(child) {
                    n_children += 1;
                }
            }
        } else {
            debug!(path = %path.printable_name(), "no outgoing state to extend from");
        }

        let mut state = self.state.lock();
        if !state.fanout.record(n_children, path.n_steps(), last.n_steps()) {
            debug!(
                total_steps = path.n_steps(),
                last_steps = last.n_steps(),
                "fanout sample skipped"
            );
        }
    }

    fn do_one_step(&self, path: &Path<S>, context: &mut ThreadContext<S>) {
        let started = Instant::now();
        self.execute(path, context);
        self.extend(path, context);
        let elapsed = started.elapsed();
        debug!(
            seconds = elapsed.as_secs_f64(),
            pending = self.frontier.size(),
            interesting = self.interesting.size(),
            "path step finished"
        );
        path.last_node().increment_processing_time(elapsed);
    }

    /// Body of a managed worker thread
    fn worker_main(&self) {
        let mut guard = WorkerGuard::adopt(self);
        let mut context = ThreadContext::new(&*self.semantics);
        guard.change(WorkerState::Waiting);
        while let Some(path) = guard.take_next_work() {
            self.do_one_step(&path, &mut context);
            guard.change(WorkerState::Waiting);
        }
        trace!("worker exiting");
    }
}

/// Concurrent path-exploration engine
pub struct Engine<S: Semantics> {
    shared: Arc<Shared<S>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: Semantics> Engine<S> {
    /// Create an engine with the default queues and predicates
    ///
    /// # Errors
    ///
    /// Returns error if `settings` are out of range
    pub fn new(semantics: impl Into<Arc<S>>, settings: Settings) -> EngineResult<Self> {
        settings.validate()?;
        let state = EngineState {
            settings: Arc::new(settings),
            frontier_predicate: Arc::new(WorkPredicate::new()),
            interesting_predicate: Arc::new(HasFinalTags),
            counters: WorkCounters::default(),
            stopping: false,
            stop_generation: 0,
            paths_explored: 0,
            steps_explored: 0,
            fanout: FanoutEstimator::new(),
            elapsed: Stopwatch::stopped(),
            since_report: Stopwatch::stopped(),
            paths_at_last_report: 0,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                semantics: semantics.into(),
                state: Mutex::new(state),
                new_work: Condvar::new(),
                new_interesting: Condvar::new(),
                frontier: PathQueue::new(Arc::new(LongestPathFirst)),
                interesting: PathQueue::new(Arc::new(ShortestPathFirst)),
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Current settings
    #[must_use]
    pub fn settings(&self) -> Arc<Settings> {
        self.shared.settings()
    }

    /// Replace the settings
    ///
    /// # Errors
    ///
    /// Returns error if `settings` are out of range
    pub fn set_settings(&self, settings: Settings) -> EngineResult<()> {
        settings.validate()?;
        self.shared.state.lock().settings = Arc::new(settings);
        Ok(())
    }

    /// The semantics collaborator
    #[must_use]
    pub fn semantics(&self) -> &Arc<S> {
        &self.shared.semantics
    }

    /// Predicate deciding what enters the frontier
    #[must_use]
    pub fn frontier_predicate(&self) -> Arc<dyn PathPredicate<S>> {
        self.shared.state.lock().frontier_predicate.clone()
    }

    /// Replace the frontier predicate
    pub fn set_frontier_predicate(&self, predicate: Arc<dyn PathPredicate<S>>) {
        self.shared.state.lock().frontier_predicate = predicate;
    }

    /// Predicate deciding what is interesting
    #[must_use]
    pub fn interesting_predicate(&self) -> Arc<dyn PathPredicate<S>> {
        self.shared.state.lock().interesting_predicate.clone()
    }

    /// Replace the interesting predicate
    pub fn set_interesting_predicate(&self, predicate: Arc<dyn PathPredicate<S>>) {
        self.shared.state.lock().interesting_predicate = predicate;
    }

    /// Ordering of the frontier
    #[must_use]
    pub fn frontier_prioritizer(&self) -> Arc<dyn PathPrioritizer<S>> {
        self.shared.frontier.prioritizer()
    }

    /// Replace the ordering of the frontier
    pub fn set_frontier_prioritizer(&self, prioritizer: Arc<dyn PathPrioritizer<S>>) {
        self.shared.frontier.set_prioritizer(prioritizer);
    }

    /// Ordering of the interesting queue
    #[must_use]
    pub fn interesting_prioritizer(&self) -> Arc<dyn PathPrioritizer<S>> {
        self.shared.interesting.prioritizer()
    }

    /// Replace the ordering of the interesting queue
    pub fn set_interesting_prioritizer(&self, prioritizer: Arc<dyn PathPrioritizer<S>>) {
        self.shared.interesting.set_prioritizer(prioritizer);
    }

    /// Seed the frontier with a root path starting at `unit`.
    ///
    /// The frontier predicate is not consulted.
    pub fn insert_starting_point(&self, unit: UnitRef<S>) -> Path<S> {
        let path = Path::root(unit);
        debug!(unit = %path.printable_name(), "starting point");
        let _state = self.shared.state.lock();
        self.shared.frontier.insert(path.clone());
        self.shared.new_work.notify_all();
        path
    }

    /// Spawn managed worker threads and return how many were spawned.
    ///
    /// `n == 0` tops the pool up to the hardware parallelism.
    ///
    /// # Errors
    ///
    /// Returns error if the OS refuses a thread; threads spawned before the
    /// failure keep running
    pub fn start_workers(&self, n: usize) -> EngineResult<usize> {
        let mut workers = self.workers.lock();
        reap_finished(&mut workers);

        let n = if n == 0 {
            let hardware = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(DEFAULT_WORKERS);
            hardware.saturating_sub(workers.len())
        } else {
            n
        };
        if n == 0 {
            return Ok(0);
        }

        info!(count = n, "starting workers");
        for _ in 0..n {
            {
                let mut state = self.shared.state.lock();
                let mut starting = WorkerState::Starting;
                self.shared.change_state_locked(&mut state, &mut starting, WorkerState::Starting);
            }
            let shared = self.shared.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("arbor-worker-{}", workers.len()))
                .spawn(move || shared.worker_main());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    let mut state = self.shared.state.lock();
                    let mut starting = WorkerState::Starting;
                    self.shared.change_state_locked(&mut state, &mut starting, WorkerState::Finished);
                    error!(%err, "failed to spawn worker");
                    return Err(EngineError::Spawn(err.to_string()));
                }
            }
        }
        Ok(n)
    }

    /// Do one step on the calling thread if work is available right now
    pub fn step(&self) -> bool {
        self.step_since(None)
    }

    fn step_since(&self, generation: Option<u64>) -> bool {
        let mut guard = WorkerGuard::start(&self.shared);
        let Some(path) = guard.take_next_work_now(generation) else {
            return false;
        };
        let mut context = ThreadContext::new(&*self.shared.semantics);
        self.shared.do_one_step(&path, &mut context);
        true
    }

    /// Work on the calling thread until no work remains or a stop happens
    pub fn run(&self) {
        let generation = self.shared.state.lock().stop_generation;
        loop {
            if self.step_since(Some(generation)) {
                continue;
            }
            let mut state = self.shared.state.lock();
            loop {
                if state.stopping || state.stop_generation != generation {
                    return;
                }
                if !self.shared.frontier.is_empty() {
                    break;
                }
                if state.counters.working == 0 {
                    return;
                }
                self.shared.new_work.wait(&mut state);
            }
        }
    }

    /// Stop every thread, keeping queued work for a later resume
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            info!(capacity = state.counters.capacity, "stop requested");
            state.stopping = true;
            state.stop_generation += 1;
            self.shared.new_work.notify_all();
            self.shared.new_interesting.notify_all();
            while state.counters.capacity > 0 {
                self.shared.new_work.wait(&mut state);
            }
        }
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        self.shared.state.lock().stopping = false;
    }

    /// Clear all queues and statistics.
    ///
    /// # Errors
    ///
    /// Returns error if any thread is still active
    pub fn reset(&self) -> EngineResult<()> {
        let mut workers = self.workers.lock();
        let mut state = self.shared.state.lock();
        if state.counters.capacity > 0 || state.counters.working > 0 || state.stopping {
            return Err(EngineError::Busy {
                capacity: state.counters.capacity,
                working: state.counters.working,
            });
        }
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }

        state.paths_explored = 0;
        state.steps_explored = 0;
        state.fanout.clear();
        state.elapsed.clear();
        state.since_report.clear();
        state.paths_at_last_report = 0;
        state.frontier_predicate.reset();
        state.interesting_predicate.reset();
        self.shared.semantics.reset();
        self.shared.frontier.reset();
        self.shared.interesting.reset();
        info!("engine reset");
        Ok(())
    }

    /// Wait for the next interesting path; `None` once no thread can produce one
    pub fn take_next_interesting(&self) -> Option<Path<S>> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(path) = self.shared.interesting.take_next() {
                return Some(path);
            }
            if state.counters.capacity == 0 {
                return None;
            }
            self.shared.new_interesting.wait(&mut state);
        }
    }

    /// Whether the frontier has paths or a thread is working
    #[must_use]
    pub fn work_remains(&self) -> bool {
        let state = self.shared.state.lock();
        !self.shared.frontier.is_empty() || state.counters.working > 0
    }

    /// Threads able to work
    #[must_use]
    pub fn work_capacity(&self) -> usize {
        self.shared.state.lock().counters.capacity
    }

    /// Threads currently working
    #[must_use]
    pub fn n_working(&self) -> usize {
        self.shared.state.lock().counters.working
    }

    /// Paths in the frontier
    #[must_use]
    pub fn n_paths_pending(&self) -> usize {
        self.shared.frontier.size()
    }

    /// Paths executed so far
    #[must_use]
    pub fn n_paths_explored(&self) -> usize {
        self.shared.state.lock().paths_explored
    }

    /// Primitive steps executed so far
    #[must_use]
    pub fn n_steps_explored(&self) -> usize {
        self.shared.state.lock().steps_explored
    }

    /// Paths in the interesting queue
    #[must_use]
    pub fn n_interesting(&self) -> usize {
        self.shared.interesting.size()
    }

    /// The interesting queue
    #[must_use]
    pub fn interesting(&self) -> &PathQueue<S> {
        &self.shared.interesting
    }

    /// Estimated execution-tree size to depth `k`
    #[must_use]
    pub fn estimated_forest_size(&self, k: usize) -> f64 {
        self.shared.state.lock().fanout.estimated_forest_size(k)
    }

    /// Time since the first thread started working
    #[must_use]
    pub fn elapsed_time(&self) -> Duration {
        self.shared.state.lock().elapsed.elapsed()
    }

    /// Snapshot for the progress report; restarts the rate window
    pub fn statistics(&self) -> EngineStatistics {
        let (mut stats, predicates) = {
            let mut state = self.shared.state.lock();
            let k = state.settings.k;
            let window = state.since_report.restart();
            let new_paths = state.paths_explored.saturating_sub(state.paths_at_last_report);
            state.paths_at_last_report = state.paths_explored;
            let stats = EngineStatistics {
                elapsed_seconds: state.elapsed.elapsed().as_secs_f64(),
                n_working: state.counters.working,
                work_capacity: state.counters.capacity,
                paths_explored: state.paths_explored,
                paths_pending: self.shared.frontier.size(),
                interesting: self.shared.interesting.size(),
                new_paths,
                exploration_rate: EngineStatistics::rate(new_paths, window),
                steps_explored: state.steps_explored,
                k,
                estimated_forest_size: state.fanout.estimated_forest_size(k),
                counters: Vec::new(),
            };
            (stats, [state.frontier_predicate.clone(), state.interesting_predicate.clone()])
        };

        let counters = predicates
            .iter()
            .flat_map(|predicate| predicate.counters())
            .chain(self.shared.semantics.counters());
        stats.counters = counters.map(|(name, value)| (name.to_string(), value)).collect();
        stats
    }

    /// Write the progress report, each line starting with `prefix`
    ///
    /// # Errors
    ///
    /// Returns error if writing fails
    pub fn show_statistics(&self, out: &mut impl io::Write, prefix: &str) -> io::Result<()> {
        out.write_all(self.statistics().render(prefix).as_bytes())
    }
}

impl<S: Semantics> Drop for Engine<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reap_finished(workers: &mut Vec<JoinHandle<()>>) {
    let (finished, running): (Vec<_>, Vec<_>) = workers.drain(..).partition(|handle| handle.is_finished());
    for handle in finished {
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
    *workers = running;
}
