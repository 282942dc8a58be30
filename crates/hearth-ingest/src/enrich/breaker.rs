//! Circuit breaker guarding the hand-off to the processing stage.
//!
//! A protective state machine: `CLOSED → OPEN → HALF_OPEN → CLOSED`. After a
//! run of consecutive failures the breaker opens and callers fail fast for a
//! cool-down period, isolating the stream client and extractor from a
//! degraded downstream. After the cool-down a single trial call is let
//! through; its outcome decides whether the breaker closes or re-opens.
//!
//! State is shared process-wide and updated under one lock so concurrent
//! success/failure reports cannot interleave into an inconsistent state.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,

    /// How long to fail fast before allowing a trial call.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Observable breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Whether the half-open trial call is currently in flight.
    trial_in_flight: bool,
}

/// The circuit breaker.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Ask permission to make a call.
    ///
    /// Returns `Err(Error::CircuitOpen)` without any downstream attempt when
    /// the breaker is open and the cool-down has not elapsed, or when a
    /// half-open trial is already in flight. Callers that get `Ok` must
    /// report the outcome via [`record_success`]/[`record_failure`].
    ///
    /// [`record_success`]: Self::record_success
    /// [`record_failure`]: Self::record_failure
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.cooldown {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(Error::CircuitOpen)
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Report a successful call. A single success closes a half-open breaker.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
        inner.opened_at = None;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Report a failed call. Opens the breaker at the failure threshold, and
    /// re-opens it (resetting the cool-down) when the half-open trial fails.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.opened_at = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
                metrics::counter!("breaker_open_total").increment(1);
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                    metrics::counter!("breaker_open_total").increment(1);
                }
            }
            // Failures reported while already open (from calls admitted
            // earlier) keep the breaker open; nothing to update.
            CircuitState::Open => {}
        }
    }

    /// Current state, as last transitioned. An open breaker whose cool-down
    /// has elapsed still reports `Open` until the next [`try_acquire`]
    /// promotes it to half-open.
    ///
    /// [`try_acquire`]: Self::try_acquire
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitState) {
        tracing::info!(from = inner.state.as_str(), to = next.as_str(), "circuit breaker state");
        inner.state = next;
        metrics::gauge!("breaker_state").set(next.gauge_value());
    }
}
