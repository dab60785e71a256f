//! Failure-counting circuit breaker.
//!
//! State machine: `Closed` counts consecutive failures and opens at the
//! threshold; `Open` fails fast until the recovery timeout elapses, then
//! moves to `HalfOpen`; the next recorded outcome in `HalfOpen` either
//! closes the breaker or re-opens it. Cancellation records nothing.
//!
//! The state lives under a `std::sync::Mutex`; the lock is never held
//! across an await point.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{AclError, Result};

/// Breaker state variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

/// A consecutive-failure circuit breaker guarding one store endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Gate a call: `Ok` admits it, `Err(CircuitOpen)` rejects it without
    /// contacting the store.
    pub fn check(&self) -> Result<()> {
        self.check_at(Instant::now())
    }

    pub(crate) fn check_at(&self, now: Instant) -> Result<()> {
        let recovery = Duration::from_secs_f64(self.config.recovery_timeout.max(0.0));
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match &*inner {
            Inner::Closed { .. } | Inner::HalfOpen => Ok(()),
            Inner::Open { since } => {
                let elapsed = now.saturating_duration_since(*since);
                if elapsed >= recovery {
                    *inner = Inner::HalfOpen;
                    info!("circuit breaker half-open, admitting probe");
                    Ok(())
                } else {
                    let remaining = recovery - elapsed;
                    Err(AclError::CircuitOpen {
                        retry_after_secs: remaining.as_secs_f64(),
                    })
                }
            }
        }
    }

    /// Record a successful call: closes the breaker and resets the count.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if matches!(*inner, Inner::HalfOpen | Inner::Open { .. }) {
            info!("circuit breaker closed after successful probe");
        }
        *inner = Inner::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a failed call. A failure in `HalfOpen` re-opens immediately;
    /// in `Closed`, the breaker opens once the threshold is reached.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now())
    }

    pub(crate) fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = *consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker opened"
                    );
                    *inner = Inner::Open { since: now };
                }
            }
            Inner::HalfOpen => {
                warn!("circuit breaker re-opened after failed probe");
                *inner = Inner::Open { since: now };
            }
            Inner::Open { .. } => {}
        }
    }

    /// Current state label, for logs and health payloads.
    pub fn state(&self) -> CircuitState {
        match &*self.inner.lock().expect("breaker lock poisoned") {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Current consecutive-failure count (0 outside `Closed`).
    pub fn consecutive_failures(&self) -> u32 {
        match &*self.inner.lock().expect("breaker lock poisoned") {
            Inner::Closed {
                consecutive_failures,
            } => *consecutive_failures,
            _ => 0,
        }
    }
}
