//! Wall-clock measurement for statistics.
//!
//! Time never influences search order. It feeds the report and the per-path
//! time limit only.

use std::time::{Duration, Instant};

/// Accumulating stopwatch
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    /// When the current run started, if running
    started: Option<Instant>,
    /// Time accumulated by previous runs
    accumulated: Duration,
}

impl Stopwatch {
    /// Create a running stopwatch
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Some(Instant::now()),
            accumulated: Duration::ZERO,
        }
    }

    /// Create a stopped stopwatch reading zero
    #[must_use]
    pub const fn stopped() -> Self {
        Self {
            started: None,
            accumulated: Duration::ZERO,
        }
    }

    /// Start (or keep running) without clearing
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Stop and return the total
    pub fn stop(&mut self) -> Duration {
        if let Some(started) = self.started.take() {
            self.accumulated += started.elapsed();
        }
        self.accumulated
    }

    /// Reset to zero and start running again.
    ///
    /// Returns the reading before the reset, zero if never started.
    pub fn restart(&mut self) -> Duration {
        let before = self.elapsed();
        self.accumulated = Duration::ZERO;
        self.started = Some(Instant::now());
        before
    }

    /// Reset to zero and stop
    pub fn clear(&mut self) {
        self.accumulated = Duration::ZERO;
        self.started = None;
    }

    /// Whether the stopwatch is running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Current reading
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match self.started {
            Some(started) => self.accumulated + started.elapsed(),
            None => self.accumulated,
        }
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::stopped()
    }
}

impl std::fmt::Display for Stopwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_seconds(self.elapsed()))
    }
}

/// Format a duration for human reports
#[must_use]
pub fn format_seconds(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{:.3} seconds", secs)
    } else {
        let total = duration.as_secs();
        let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
        if hours > 0 {
            format!("{}h{:02}m{:02}s", hours, minutes, seconds)
        } else {
            format!("{}m{:02}s", minutes, seconds)
        }
    }
}
