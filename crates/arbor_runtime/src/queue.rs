//! Priority queues of paths.
//!
//! Scores come from a replaceable [`PathPrioritizer`]. The highest score is
//! taken first; equal scores are taken in insertion order.

use crate::path::Path;
use crate::semantics::Semantics;
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Scoring function for a [`PathQueue`]
pub trait PathPrioritizer<S: Semantics>: Send + Sync {
    /// Score of `path`; higher is taken first
    fn priority(&self, path: &Path<S>) -> f64;

    /// Name for reports
    fn name(&self) -> &'static str;

    /// Clear any cumulative state
    fn reset(&self) {}
}

/// Prefer paths with more primitive steps
#[derive(Debug, Clone, Copy, Default)]
pub struct LongestPathFirst;

impl<S: Semantics> PathPrioritizer<S> for LongestPathFirst {
    fn priority(&self, path: &Path<S>) -> f64 {
        path.n_steps() as f64
    }

    fn name(&self) -> &'static str {
        "longest path first"
    }
}

/// Prefer paths with fewer primitive steps
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestPathFirst;

impl<S: Semantics> PathPrioritizer<S> for ShortestPathFirst {
    fn priority(&self, path: &Path<S>) -> f64 {
        -(path.n_steps() as f64)
    }

    fn name(&self) -> &'static str {
        "shortest path first"
    }
}

/// Prefer paths that have used the least processing time
#[derive(Debug, Clone, Copy, Default)]
pub struct FastestPathFirst;

impl<S: Semantics> PathPrioritizer<S> for FastestPathFirst {
    fn priority(&self, path: &Path<S>) -> f64 {
        -path.processing_time().as_secs_f64()
    }

    fn name(&self) -> &'static str {
        "fastest path first"
    }
}

/// Totally ordered score
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Entries keyed so that the last entry is the next to take
type EntryKey = (Score, Reverse<u64>);

struct QueueInner<S: Semantics> {
    entries: BTreeMap<EntryKey, Path<S>>,
    next_seq: u64,
    prioritizer: Arc<dyn PathPrioritizer<S>>,
}

impl<S: Semantics> QueueInner<S> {
    fn push(&mut self, path: Path<S>) {
        let score = self.prioritizer.priority(&path);
        path.last_node().set_sort_key(score);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((Score(score), Reverse(seq)), path);
    }
}

/// Thread-safe priority queue of paths
pub struct PathQueue<S: Semantics> {
    inner: Mutex<QueueInner<S>>,
}

impl<S: Semantics> PathQueue<S> {
    /// Create an empty queue ordered by `prioritizer`
    #[must_use]
    pub fn new(prioritizer: Arc<dyn PathPrioritizer<S>>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: BTreeMap::new(),
                next_seq: 0,
                prioritizer,
            }),
        }
    }

    /// Add a path
    pub fn insert(&self, path: Path<S>) {
        self.inner.lock().push(path);
    }

    /// Remove the highest-scored path
    pub fn take_next(&self) -> Option<Path<S>> {
        self.inner.lock().entries.pop_last().map(|(_, path)| path)
    }

    /// Number of queued paths
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop all paths and reset the prioritizer
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.next_seq = 0;
        inner.prioritizer.reset();
    }

    /// Current prioritizer
    #[must_use]
    pub fn prioritizer(&self) -> Arc<dyn PathPrioritizer<S>> {
        self.inner.lock().prioritizer.clone()
    }

    /// Replace the prioritizer and re-score everything queued
    pub fn set_prioritizer(&self, prioritizer: Arc<dyn PathPrioritizer<S>>) {
        let mut inner = self.inner.lock();
        inner.prioritizer = prioritizer;
        // Re-inserting in sequence order keeps ties FIFO.
        let mut queued: Vec<(u64, Path<S>)> = std::mem::take(&mut inner.entries)
            .into_iter()
            .map(|((_, Reverse(seq)), path)| (seq, path))
            .collect();
        queued.sort_unstable_by_key(|(seq, _)| *seq);
        inner.next_seq = 0;
        for (_, path) in queued {
            inner.push(path);
        }
    }

    /// Snapshot of the queued paths in the order they would be taken
    #[must_use]
    pub fn paths(&self) -> Vec<Path<S>> {
        self.inner.lock().entries.values().rev().cloned().collect()
    }
}

impl<S: Semantics> fmt::Debug for PathQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PathQueue")
            .field("prioritizer", &inner.prioritizer.name())
            .field("size", &inner.entries.len())
            .finish()
    }
}
