//! Execution time budget.
//!
//! Every request runs under a hard ceiling. The budget reports how much of
//! it is left after reserving a safety margin, so lock waits and retry
//! sleeps can be clamped before work starts that could not finish in time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockable::Clock;

/// Remaining-time tracker for one request.
#[derive(Clone)]
pub struct ExecutionBudget {
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
    ceiling: Duration,
    safety_margin: Duration,
}

impl ExecutionBudget {
    /// Start a budget now.
    pub fn start(clock: Arc<dyn Clock>, ceiling: Duration, safety_margin: Duration) -> Self {
        let started_at = clock.utc();
        Self {
            clock,
            started_at,
            ceiling,
            safety_margin,
        }
    }

    /// Time spent since the budget started.
    pub fn elapsed(&self) -> Duration {
        (self.clock.utc() - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Usable time left: ceiling minus margin minus elapsed, floored at zero.
    pub fn remaining(&self) -> Duration {
        self.ceiling
            .saturating_sub(self.safety_margin)
            .saturating_sub(self.elapsed())
    }

    /// Whether no usable time remains.
    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Whether `wait` can elapse and still leave time for further work.
    pub fn can_afford(&self, wait: Duration) -> bool {
        wait < self.remaining()
    }

    /// Clamp `wait` to the remaining budget; `None` when nothing remains.
    pub fn bounded(&self, wait: Duration) -> Option<Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            None
        } else {
            Some(wait.min(remaining))
        }
    }
}

impl std::fmt::Debug for ExecutionBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionBudget")
            .field("started_at", &self.started_at)
            .field("ceiling", &self.ceiling)
            .field("safety_margin", &self.safety_margin)
            .finish_non_exhaustive()
    }
}
