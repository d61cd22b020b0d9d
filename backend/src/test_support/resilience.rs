//! Sleepers and jitter strategies for executor tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::MutableClock;
use crate::domain::resilience::{BackoffJitter, RetrySleeper};

/// Records requested delays without sleeping.
#[derive(Default)]
pub struct RecordingSleeper(Mutex<Vec<Duration>>);

impl RecordingSleeper {
    /// Delays requested so far, in order.
    pub fn recorded(&self) -> Vec<Duration> {
        match self.0.lock() {
            Ok(entries) => entries.clone(),
            Err(_) => panic!("sleeper mutex"),
        }
    }
}

#[async_trait]
impl RetrySleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        let mut entries = match self.0.lock() {
            Ok(entries) => entries,
            Err(_) => panic!("sleeper mutex"),
        };
        entries.push(duration);
    }
}

/// Advances a [`MutableClock`] instead of sleeping, so budgets observe the
/// time retries would have taken.
pub struct ClockAdvancingSleeper(pub Arc<MutableClock>);

#[async_trait]
impl RetrySleeper for ClockAdvancingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.0.advance(duration);
    }
}

/// Uses the base delay unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl BackoffJitter for NoJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        base
    }
}
