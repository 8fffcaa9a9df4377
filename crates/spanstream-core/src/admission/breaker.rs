//! Circuit breaker for the model backend
//!
//! Closed: requests flow, consecutive failures are counted.
//! Open: requests are rejected until the recovery period elapses.
//! HalfOpen: one trial outcome decides between Closed and Open.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    recovery: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            recovery,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Gate a new request. An open breaker moves to half-open once the
    /// recovery period is over.
    pub fn check(&self) -> Result<(), StreamError> {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open {
            let recovered = inner
                .opened_at
                .map(|at| at.elapsed() >= self.recovery)
                .unwrap_or(true);
            if !recovered {
                return Err(StreamError::ServiceUnavailable);
            }
            info!("Breaker: Recovery period elapsed, half-open");
            inner.state = BreakerState::HalfOpen;
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            info!("Breaker: Closed after successful request");
        }
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        let trip = inner.state == BreakerState::HalfOpen || inner.failures >= self.threshold;
        if trip && inner.state != BreakerState::Open {
            warn!(failures = inner.failures, "Breaker: Opened");
        }
        if trip {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }
}
