//! Scope timer for the hot cycles.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Measures a scope and logs its duration when dropped.
///
/// Durations above the budget are logged at `warn`.
#[derive(Debug)]
pub struct ScopeTimer {
    label: &'static str,
    started: Instant,
    budget: Duration,
}

impl ScopeTimer {
    /// Start timing `label` against `budget`.
    pub fn start(label: &'static str, budget: Duration) -> Self {
        Self {
            label,
            started: Instant::now(),
            budget,
        }
    }

    /// Time since the timer started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the scope has run past its budget so far.
    pub fn over_budget(&self) -> bool {
        self.elapsed() > self.budget
    }
}

impl Drop for ScopeTimer {
    fn drop(&mut self) {
        let elapsed = self.elapsed();
        let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        if elapsed > self.budget {
            warn!(
                label = self.label,
                elapsed_us,
                budget_us = u64::try_from(self.budget.as_micros()).unwrap_or(u64::MAX),
                "cycle over budget"
            );
        } else {
            debug!(label = self.label, elapsed_us, "cycle timed");
        }
    }
}
