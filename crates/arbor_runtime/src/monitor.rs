//! Exploration statistics.
//!
//! The fanout estimator samples how many children each step produced, per
//! tree level, and extrapolates the size of the execution tree to a depth.
//! [`EngineStatistics`] is the snapshot behind the periodic report.

use arbor_core::format_seconds;
use serde::Serialize;
use std::fmt::{self, Write as _};
use std::time::Duration;

/// Estimates above this are reported as "very large"
pub const VERY_LARGE_FOREST: f64 = 1e9;

/// Window after which the exploration rate is reported
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Sum and count of fanout samples at one tree level
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FanoutLevel {
    /// Sum of observed children per node
    pub total: f64,
    /// Number of observations
    pub samples: usize,
}

impl FanoutLevel {
    /// Average branching factor; 1.0 if never observed
    #[must_use]
    pub fn factor(&self) -> f64 {
        if self.samples == 0 {
            1.0
        } else {
            self.total / self.samples as f64
        }
    }
}

/// Per-level branching statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FanoutEstimator {
    levels: Vec<FanoutLevel>,
    roots: usize,
}

impl FanoutEstimator {
    /// Create an empty estimator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one extension step.
    ///
    /// `total_steps` is the path length in primitive steps and `last_steps`
    /// the length of its last node. The internal steps of the last node each
    /// have a fanout of one; its final step has `n_children`. Returns false and
    /// records nothing when the lengths are inconsistent.
    pub fn record(&mut self, n_children: usize, total_steps: usize, last_steps: usize) -> bool {
        if last_steps == 0 || total_steps < last_steps {
            return false;
        }
        if total_steps > self.levels.len() {
            self.levels.resize(total_steps, FanoutLevel::default());
        }
        for level in &mut self.levels[total_steps - last_steps..total_steps - 1] {
            level.total += 1.0;
            level.samples += 1;
        }
        let last = &mut self.levels[total_steps - 1];
        last.total += n_children as f64;
        last.samples += 1;
        if last_steps == total_steps {
            self.roots += 1;
        }
        true
    }

    /// Estimated number of tree nodes at depths `0..k`.
    ///
    /// Level zero starts from the number of roots seen (at least one). Each
    /// deeper level multiplies by the observed factor of the level above, or
    /// by the mean observed factor past the deepest sample.
    #[must_use]
    pub fn estimated_forest_size(&self, k: usize) -> f64 {
        let mut row = (self.roots as f64).max(1.0);
        let mut total = 0.0;
        let mut factor_total = 0.0;
        for i in 0..k {
            total += row;
            if let Some(level) = self.levels.get(i) {
                let factor = level.factor();
                factor_total += factor;
                row *= factor;
            } else if !self.levels.is_empty() {
                row *= factor_total / self.levels.len() as f64;
            }
        }
        total
    }

    /// Number of levels with samples
    #[must_use]
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Samples at one level
    #[must_use]
    pub fn level(&self, level: usize) -> Option<FanoutLevel> {
        self.levels.get(level).copied()
    }

    /// Number of root steps recorded
    #[must_use]
    pub fn roots(&self) -> usize {
        self.roots
    }

    /// Forget all samples
    pub fn clear(&mut self) {
        self.levels.clear();
        self.roots = 0;
    }
}

/// Snapshot of engine progress
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatistics {
    /// Time since the first thread started working
    pub elapsed_seconds: f64,
    /// Threads currently working
    pub n_working: usize,
    /// Threads able to work
    pub work_capacity: usize,
    /// Paths executed
    pub paths_explored: usize,
    /// Paths in the frontier
    pub paths_pending: usize,
    /// Paths in the interesting queue
    pub interesting: usize,
    /// Paths explored since the previous report
    pub new_paths: usize,
    /// Paths per minute, once the previous report is old enough
    pub exploration_rate: Option<f64>,
    /// Primitive steps executed
    pub steps_explored: usize,
    /// Depth horizon
    pub k: usize,
    /// Estimated tree size to depth `k`
    pub estimated_forest_size: f64,
    /// Predicate and semantics counters
    pub counters: Vec<(String, usize)>,
}

impl EngineStatistics {
    /// Rate in paths per minute for `new_paths` over `window`, if the window is long enough
    #[must_use]
    pub fn rate(new_paths: usize, window: Duration) -> Option<f64> {
        if window >= RATE_WINDOW {
            Some(60.0 * new_paths as f64 / window.as_secs_f64())
        } else {
            None
        }
    }

    /// Percentage of the estimated tree that has been explored
    #[must_use]
    pub fn percent_explored(&self) -> f64 {
        if self.estimated_forest_size > 0.0 {
            100.0 * self.steps_explored as f64 / self.estimated_forest_size
        } else {
            0.0
        }
    }

    /// Multi-line report, each line starting with `prefix`
    #[must_use]
    pub fn render(&self, prefix: &str) -> String {
        let mut out = String::new();
        let mut line = |label: &str, value: String| {
            let _ = writeln!(out, "{}{:<39} {}", prefix, label, value);
        };

        line(
            "total elapsed time:",
            format_seconds(Duration::try_from_secs_f64(self.elapsed_seconds).unwrap_or_default()),
        );
        line("threads:", format!("{} working of {} total", self.n_working, self.work_capacity));
        line("paths explored:", self.paths_explored.to_string());
        line("paths waiting to be explored:", self.paths_pending.to_string());
        line("interesting paths found:", self.interesting.to_string());
        if let Some(rate) = self.exploration_rate {
            if self.new_paths >= 1 {
                line("exploration rate:", format!("{:.3} paths/minute", rate));
            } else {
                line("exploration rate:", "less than one path/minute".to_string());
            }
        }
        line("execution tree nodes explored:", self.steps_explored.to_string());
        let size_label = format!("execution tree size to depth {}:", self.k);
        if self.estimated_forest_size < VERY_LARGE_FOREST {
            line(&size_label, format!("{:.0} nodes estimated", self.estimated_forest_size));
        } else {
            line(&size_label, "very large estimated".to_string());
        }
        line(
            "portion of execution tree explored:",
            format!("{:.2}% estimated", self.percent_explored()),
        );
        let _ = writeln!(out, "{}(estimates can be wildly incorrect for small sample sizes)", prefix);
        for (name, value) in &self.counters {
            let _ = writeln!(out, "{}{:<39} {}", prefix, format!("{}:", name), value);
        }
        out
    }
}

impl fmt::Display for EngineStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Record a complete `b`-ary tree of one-step nodes, `k` levels deep
    fn full_tree(b: usize, k: usize) -> FanoutEstimator {
        let mut estimator = FanoutEstimator::new();
        let mut width = 1usize;
        for depth in 0..k {
            let children = if depth + 1 < k { b } else { 0 };
            for _ in 0..width {
                assert!(estimator.record(children, depth + 1, 1));
            }
            width *= b;
        }
        estimator
    }

    fn geometric(b: usize, k: usize) -> f64 {
        (0..k).map(|i| (b as f64).powi(i as i32)).sum()
    }

    #[test]
    fn test_empty_estimate_counts_one_per_level() {
        let estimator = FanoutEstimator::new();
        assert_eq!(estimator.estimated_forest_size(5), 5.0);
        assert_eq!(estimator.estimated_forest_size(0), 0.0);
    }

    #[test]
    fn test_unseen_levels_use_mean_factor() {
        let mut estimator = FanoutEstimator::new();
        estimator.record(2, 1, 1);
        assert_eq!(estimator.roots(), 1);
        assert_eq!(estimator.estimated_forest_size(3), 1.0 + 2.0 + 4.0);
    }

    #[test]
    fn test_binary_tree_estimate() {
        let estimator = full_tree(2, 3);
        assert_eq!(estimator.estimated_forest_size(3), 7.0);
        assert_eq!(estimator.depth(), 3);
        assert_eq!(estimator.level(0), Some(FanoutLevel { total: 2.0, samples: 1 }));
        assert_eq!(estimator.level(2), Some(FanoutLevel { total: 0.0, samples: 4 }));
    }

    #[test]
    fn test_multi_step_node() {
        let mut estimator = FanoutEstimator::new();
        assert!(estimator.record(3, 5, 3));
        assert_eq!(estimator.roots(), 0);
        assert_eq!(estimator.level(1), Some(FanoutLevel::default()));
        assert_eq!(estimator.level(2), Some(FanoutLevel { total: 1.0, samples: 1 }));
        assert_eq!(estimator.level(3), Some(FanoutLevel { total: 1.0, samples: 1 }));
        assert_eq!(estimator.level(4), Some(FanoutLevel { total: 3.0, samples: 1 }));
    }

    #[test]
    fn test_inconsistent_sample_ignored() {
        let mut estimator = FanoutEstimator::new();
        assert!(!estimator.record(1, 3, 0));
        assert!(!estimator.record(1, 2, 3));
        assert_eq!(estimator, FanoutEstimator::new());
    }

    #[test]
    fn test_clear() {
        let mut estimator = full_tree(3, 2);
        estimator.clear();
        assert_eq!(estimator.depth(), 0);
        assert_eq!(estimator.roots(), 0);
    }

    #[test]
    fn test_rate_window() {
        assert_eq!(EngineStatistics::rate(10, Duration::from_secs(30)), None);
        assert_eq!(EngineStatistics::rate(10, Duration::from_secs(120)), Some(5.0));
    }

    #[test]
    fn test_render_report() {
        let stats = EngineStatistics {
            elapsed_seconds: 1.5,
            n_working: 1,
            work_capacity: 4,
            paths_explored: 7,
            paths_pending: 2,
            interesting: 1,
            new_paths: 7,
            exploration_rate: None,
            steps_explored: 7,
            k: 3,
            estimated_forest_size: 14.0,
            counters: vec![("paths terminated due to K limit".to_string(), 8)],
        };
        let report = stats.render("  ");

        assert!(report.contains("  total elapsed time:                     1.500 seconds\n"));
        assert!(report.contains("threads:                                1 working of 4 total"));
        assert!(report.contains("execution tree size to depth 3:         14 nodes estimated"));
        assert!(report.contains("portion of execution tree explored:     50.00% estimated"));
        assert!(report.contains("paths terminated due to K limit:        8"));
        assert!(!report.contains("exploration rate"));
        assert!(report.lines().all(|line| line.starts_with("  ")));
    }

    #[test]
    fn test_render_rate_and_very_large() {
        let stats = EngineStatistics {
            exploration_rate: Some(0.0),
            new_paths: 0,
            k: 1000,
            estimated_forest_size: 2e9,
            ..EngineStatistics::default()
        };
        let report = stats.to_string();
        assert!(report.contains("less than one path/minute"));
        assert!(report.contains("very large estimated"));
    }

    #[test]
    fn test_percent_explored_without_estimate() {
        let stats = EngineStatistics::default();
        assert_eq!(stats.percent_explored(), 0.0);
    }

    proptest! {
        #[test]
        fn prop_full_tree_estimate_is_exact(b in 1usize..5, k in 1usize..6) {
            let estimator = full_tree(b, k);
            let expected = geometric(b, k);
            let estimate = estimator.estimated_forest_size(k);
            prop_assert!((estimate - expected).abs() < 1e-9 * expected.max(1.0));
        }
    }
}
