// ── Circuit breaker ──
//
// Counts consecutive transient failures across all calls made through a
// transport. Past the threshold the breaker opens and every call fails fast
// until the cooldown elapses; then a single trial call is let through.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { trial_started: Instant },
}

/// Observable breaker position, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPosition {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    pub fn position(&self) -> CircuitPosition {
        match *self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            State::Closed { .. } => CircuitPosition::Closed,
            State::Open { .. } => CircuitPosition::Open,
            State::HalfOpen { .. } => CircuitPosition::HalfOpen,
        }
    }

    /// Admit or reject a call.
    ///
    /// An open breaker past its cooldown moves to half-open and admits the
    /// caller as the trial. While a trial is in flight other callers are
    /// rejected; a trial that never reports back stops blocking after one
    /// further cooldown.
    pub fn check(&self) -> Result<(), Error> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            State::Closed { .. } => Ok(()),
            State::Open { until } if now < until => Err(Error::CircuitOpen {
                retry_in_secs: until.saturating_duration_since(now).as_secs(),
            }),
            State::Open { .. } => {
                debug!("circuit half-open, admitting trial request");
                *state = State::HalfOpen { trial_started: now };
                Ok(())
            }
            State::HalfOpen { trial_started } => {
                if now.saturating_duration_since(trial_started) >= self.cooldown {
                    *state = State::HalfOpen { trial_started: now };
                    Ok(())
                } else {
                    Err(Error::CircuitOpen { retry_in_secs: 0 })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, State::Closed { .. }) {
            info!("circuit closed, resuming normal operation");
        }
        *state = State::Closed { failures: 0 };
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            State::Closed { failures } => {
                let failures = failures.saturating_add(1);
                if failures >= self.threshold {
                    warn!(
                        failures,
                        open_for_secs = self.cooldown.as_secs(),
                        "circuit opened after repeated failures"
                    );
                    *state = State::Open {
                        until: now + self.cooldown,
                    };
                } else {
                    *state = State::Closed { failures };
                }
            }
            State::HalfOpen { .. } => {
                warn!(
                    open_for_secs = self.cooldown.as_secs(),
                    "circuit trial failed, re-opening"
                );
                *state = State::Open {
                    until: now + self.cooldown,
                };
            }
            State::Open { .. } => {}
        }
    }
}
