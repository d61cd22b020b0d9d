//! Circuit breaker state machine.
//!
//! Each named operation class owns one breaker. Transient failures are
//! counted in a rolling monitor window; reaching the threshold opens the
//! breaker. After the reset timeout a single probe is admitted (half-open)
//! and a run of successful probes closes it again.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Transient failures within `monitor_window` that open the breaker.
    pub failure_threshold: u32,
    /// Width of the rolling failure window.
    pub monitor_window: Duration,
    /// Time the breaker stays open before admitting a probe.
    pub reset_timeout: Duration,
    /// Consecutive successful probes required to close again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            monitor_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Observable circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Calls fail fast until the reset timeout elapses.
    Open,
    /// Probe calls are admitted one at a time.
    HalfOpen,
}

impl CircuitState {
    /// Lowercase label used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// A state change worth logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CircuitTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Admission decision for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Call proceeds normally.
    Allowed,
    /// Call proceeds as the half-open probe.
    Probe(Option<CircuitTransition>),
    /// Breaker is open or a probe is already in flight.
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { opened_at: DateTime<Utc> },
    HalfOpen { probe_in_flight: bool, successes: u32 },
}

/// Mutable breaker state for one operation class.
#[derive(Debug, Clone)]
pub(crate) struct CircuitBreaker {
    config: CircuitBreakerConfig,
    phase: Phase,
    failures: VecDeque<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub(crate) fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                success_threshold: config.success_threshold.max(1),
                ..config
            },
            phase: Phase::Closed,
            failures: VecDeque::new(),
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        match self.phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub(crate) fn admit(&mut self, now: DateTime<Utc>) -> Admission {
        match self.phase {
            Phase::Closed => Admission::Allowed,
            Phase::Open { opened_at } if has_elapsed(opened_at, now, self.config.reset_timeout) => {
                self.phase = Phase::HalfOpen {
                    probe_in_flight: true,
                    successes: 0,
                };
                Admission::Probe(Some(CircuitTransition {
                    from: CircuitState::Open,
                    to: CircuitState::HalfOpen,
                }))
            }
            Phase::Open { .. } => Admission::Denied,
            Phase::HalfOpen {
                probe_in_flight: true,
                ..
            } => Admission::Denied,
            Phase::HalfOpen {
                probe_in_flight: false,
                successes,
            } => {
                self.phase = Phase::HalfOpen {
                    probe_in_flight: true,
                    successes,
                };
                Admission::Probe(None)
            }
        }
    }

    pub(crate) fn record_success(&mut self) -> Option<CircuitTransition> {
        match self.phase {
            Phase::Closed | Phase::Open { .. } => None,
            Phase::HalfOpen { successes, .. } => {
                let successes = successes.saturating_add(1);
                if successes >= self.config.success_threshold {
                    self.phase = Phase::Closed;
                    self.failures.clear();
                    Some(CircuitTransition {
                        from: CircuitState::HalfOpen,
                        to: CircuitState::Closed,
                    })
                } else {
                    self.phase = Phase::HalfOpen {
                        probe_in_flight: false,
                        successes,
                    };
                    None
                }
            }
        }
    }

    pub(crate) fn record_failure(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        match self.phase {
            Phase::Closed => {
                self.failures.push_back(now);
                self.evict_outside_window(now);
                let threshold = usize::try_from(self.config.failure_threshold).unwrap_or(usize::MAX);
                if self.failures.len() >= threshold {
                    self.phase = Phase::Open { opened_at: now };
                    self.failures.clear();
                    Some(CircuitTransition {
                        from: CircuitState::Closed,
                        to: CircuitState::Open,
                    })
                } else {
                    None
                }
            }
            Phase::HalfOpen { .. } => {
                self.phase = Phase::Open { opened_at: now };
                Some(CircuitTransition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            Phase::Open { .. } => None,
        }
    }

    fn evict_outside_window(&mut self, now: DateTime<Utc>) {
        while let Some(oldest) = self.failures.front() {
            if has_elapsed(*oldest, now, self.config.monitor_window) {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

fn has_elapsed(since: DateTime<Utc>, now: DateTime<Utc>, span: Duration) -> bool {
    // An unrepresentable span is treated as elapsed so the breaker can
    // never wedge open.
    let Ok(span) = chrono::Duration::from_std(span) else {
        return true;
    };

    now >= since + span
}
