//! Admission predicates.
//!
//! A predicate decides whether a path enters the frontier or the interesting
//! set. Rejection is an ordinary answer, not an error.

use crate::path::Path;
use crate::semantics::Semantics;
use arbor_core::Settings;
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Answer of a predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Whether the path is admitted
    pub accepted: bool,
    /// Human-readable reason
    pub reason: Cow<'static, str>,
}

impl Admission {
    /// Admit with a reason
    #[must_use]
    pub fn accept(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
        }
    }

    /// Refuse with a reason
    #[must_use]
    pub fn reject(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

/// Test applied to candidate paths
pub trait PathPredicate<S: Semantics>: Send + Sync {
    /// Decide whether `path` is admitted
    fn test(&self, settings: &Settings, path: &Path<S>) -> Admission;

    /// Name for reports
    fn name(&self) -> &'static str {
        "predicate"
    }

    /// Clear counters
    fn reset(&self) {}

    /// Named counters for the statistics report
    fn counters(&self) -> Vec<(&'static str, usize)> {
        Vec::new()
    }
}

impl<S, F> PathPredicate<S> for F
where
    S: Semantics,
    F: Fn(&Settings, &Path<S>) -> Admission + Send + Sync,
{
    fn test(&self, settings: &Settings, path: &Path<S>) -> Admission {
        self(settings, path)
    }
}

/// Default frontier predicate: bounds path length and processing time
#[derive(Debug, Default)]
pub struct WorkPredicate {
    k_limit_reached: AtomicUsize,
    time_limit_reached: AtomicUsize,
}

impl WorkPredicate {
    /// Create with zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths rejected for exceeding `k`
    #[must_use]
    pub fn k_limit_reached(&self) -> usize {
        self.k_limit_reached.load(Ordering::Relaxed)
    }

    /// Paths rejected for exceeding the time limit
    #[must_use]
    pub fn time_limit_reached(&self) -> usize {
        self.time_limit_reached.load(Ordering::Relaxed)
    }
}

impl<S: Semantics> PathPredicate<S> for WorkPredicate {
    fn test(&self, settings: &Settings, path: &Path<S>) -> Admission {
        if path.n_steps() > settings.k {
            self.k_limit_reached.fetch_add(1, Ordering::Relaxed);
            return Admission::reject("k limit reached");
        }
        if let Some(limit) = settings.max_time_limit() {
            if path.processing_time() >= limit {
                self.time_limit_reached.fetch_add(1, Ordering::Relaxed);
                return Admission::reject("time limit reached");
            }
        }
        Admission::accept("")
    }

    fn name(&self) -> &'static str {
        "work"
    }

    fn reset(&self) {
        self.k_limit_reached.store(0, Ordering::Relaxed);
        self.time_limit_reached.store(0, Ordering::Relaxed);
    }

    fn counters(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("paths terminated due to K limit", self.k_limit_reached()),
            ("paths terminated due to time limit", self.time_limit_reached()),
        ]
    }
}

/// Default interesting predicate: the last node produced a tag
#[derive(Debug, Clone, Copy, Default)]
pub struct HasFinalTags;

impl<S: Semantics> PathPredicate<S> for HasFinalTags {
    fn test(&self, _settings: &Settings, path: &Path<S>) -> Admission {
        if path.last_node().n_tags() > 0 {
            Admission::accept("has tags")
        } else {
            Admission::reject("no tags")
        }
    }

    fn name(&self) -> &'static str {
        "has final tags"
    }
}

/// Admits everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyPath;

impl<S: Semantics> PathPredicate<S> for AnyPath {
    fn test(&self, _settings: &Settings, _path: &Path<S>) -> Admission {
        Admission::accept("any path")
    }

    fn name(&self) -> &'static str {
        "any path"
    }
}

/// Admits nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPath;

impl<S: Semantics> PathPredicate<S> for NoPath {
    fn test(&self, _settings: &Settings, _path: &Path<S>) -> Admission {
        Admission::reject("no path")
    }

    fn name(&self) -> &'static str {
        "no path"
    }
}
