//! Harness that drives an engine over a synthetic tree to completion.

use crate::error::SimResult;
use crate::model::TreeModel;
use crate::semantics::TreeSemantics;
use arbor_core::{CoreError, Settings, Tag};
use arbor_runtime::{Engine, EngineStatistics, Path};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Horizon used when no settings are given; the default engine horizon is far
/// too deep for a complete synthetic tree
pub const DEFAULT_SIM_K: usize = 12;

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Tree to explore
    pub model: TreeModel,
    /// Engine settings
    pub settings: Settings,
    /// Managed worker threads; zero means one per hardware thread
    pub threads: usize,
}

impl SimConfig {
    /// Create a config for `model` with default settings
    #[must_use]
    pub fn new(model: TreeModel) -> Self {
        Self {
            model,
            settings: Settings::new().with_k(DEFAULT_SIM_K),
            threads: 0,
        }
    }

    /// Set the engine settings
    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the number of worker threads
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Parse a config from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed
    pub fn from_json(json: &str) -> SimResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(CoreError::from)?;
        Ok(config)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(TreeModel::default())
    }
}

/// An interesting path, detached from the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterestingPath {
    /// Unit names, root first
    pub units: Vec<String>,
    /// Unit addresses, root first
    pub addresses: Vec<u64>,
    /// Length in primitive steps
    pub n_steps: usize,
    /// Tags of the last node
    pub tags: Vec<Tag>,
}

impl InterestingPath {
    /// Snapshot `path`
    #[must_use]
    pub fn from_path(path: &Path<TreeSemantics>) -> Self {
        let nodes = path.nodes();
        Self {
            units: nodes.iter().map(|node| node.printable_name()).collect(),
            addresses: nodes.iter().filter_map(|node| node.address()).collect(),
            n_steps: path.n_steps(),
            tags: path.last_node().tags(),
        }
    }
}

/// Outcome of a simulation
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    /// Paths executed
    pub paths_explored: usize,
    /// Primitive steps executed
    pub steps_explored: usize,
    /// Interesting paths in the order they were taken
    pub interesting: Vec<InterestingPath>,
    /// Final statistics
    pub statistics: EngineStatistics,
    /// Wall-clock time of the run
    pub elapsed_seconds: f64,
}

/// Drives one engine over one synthetic tree
pub struct SimHarness {
    config: SimConfig,
    semantics: Arc<TreeSemantics>,
    engine: Engine<TreeSemantics>,
}

impl SimHarness {
    /// Build the semantics and the engine
    ///
    /// # Errors
    ///
    /// Returns error if the model or the settings are out of range
    pub fn new(config: SimConfig) -> SimResult<Self> {
        let semantics = Arc::new(TreeSemantics::new(config.model.clone())?);
        let engine = Engine::<TreeSemantics>::new(semantics.clone(), config.settings.clone())?;
        Ok(Self {
            config,
            semantics,
            engine,
        })
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The engine, for reporting while a run is in progress
    #[must_use]
    pub fn engine(&self) -> &Engine<TreeSemantics> {
        &self.engine
    }

    /// The semantics
    #[must_use]
    pub fn semantics(&self) -> &Arc<TreeSemantics> {
        &self.semantics
    }

    /// Explore the whole tree, calling `on_found` for each interesting path
    /// as soon as it is taken from the engine
    ///
    /// # Errors
    ///
    /// Returns error if a worker thread cannot be spawned
    pub fn run_with(&self, mut on_found: impl FnMut(&InterestingPath)) -> SimResult<SimReport> {
        let started = std::time::Instant::now();
        self.engine.insert_starting_point(self.semantics.root_unit());
        let spawned = self.engine.start_workers(self.config.threads)?;
        info!(threads = spawned, k = self.config.settings.k, "exploring");

        let mut interesting = Vec::new();
        let mut drain = |interesting: &mut Vec<InterestingPath>| {
            while let Some(path) = self.engine.take_next_interesting() {
                let found = InterestingPath::from_path(&path);
                on_found(&found);
                interesting.push(found);
            }
        };
        drain(&mut interesting);
        // Finish on this thread whatever the workers left behind.
        self.engine.run();
        drain(&mut interesting);
        self.engine.stop();

        let report = SimReport {
            paths_explored: self.engine.n_paths_explored(),
            steps_explored: self.engine.n_steps_explored(),
            interesting,
            statistics: self.engine.statistics(),
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            paths = report.paths_explored,
            interesting = report.interesting.len(),
            seconds = report.elapsed_seconds,
            "exploration finished"
        );
        Ok(report)
    }

    /// Explore the whole tree
    ///
    /// # Errors
    ///
    /// Returns error if a worker thread cannot be spawned
    pub fn run(&self) -> SimResult<SimReport> {
        self.run_with(|_| {})
    }
}
