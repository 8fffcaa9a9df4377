//! Admission control
//!
//! Two independent concurrency limits, one for streaming sessions and one
//! for non-streaming completions, plus the backend circuit breaker.

mod breaker;

pub use breaker::{BreakerState, CircuitBreaker};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::error::StreamError;

/// Which limit a request counts against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Streaming,
    Completion,
}

/// Held for the lifetime of an admitted request
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct AdmissionGate {
    streaming: Arc<Semaphore>,
    completions: Arc<Semaphore>,
    streaming_limit: usize,
    completion_limit: usize,
    wait: Duration,
}

impl AdmissionGate {
    pub fn new(streaming_limit: usize, completion_limit: usize, wait: Duration) -> Self {
        Self {
            streaming: Arc::new(Semaphore::new(streaming_limit)),
            completions: Arc::new(Semaphore::new(completion_limit)),
            streaming_limit,
            completion_limit,
            wait,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            config.max_streaming_sessions,
            config.max_completions,
            config.admission_wait(),
        )
    }

    /// Take a slot in `lane`, waiting at most the configured admission wait
    pub async fn admit(&self, lane: Lane) -> Result<AdmissionPermit, StreamError> {
        let (semaphore, limit) = self.lane(lane);
        let rejected = || StreamError::AdmissionRejected {
            limit,
            waited: self.wait,
        };

        let permit = if self.wait.is_zero() {
            semaphore.clone().try_acquire_owned().ok()
        } else {
            match timeout(self.wait, semaphore.clone().acquire_owned()).await {
                Ok(Ok(permit)) => Some(permit),
                Ok(Err(e)) => {
                    warn!(?lane, error = %e, "Admission: Semaphore closed");
                    None
                }
                Err(_) => None,
            }
        };

        match permit {
            Some(permit) => {
                debug!(?lane, active = self.active(lane), "Admission: Admitted");
                Ok(AdmissionPermit { _permit: permit })
            }
            None => {
                warn!(?lane, limit, "Admission: Rejected, limit reached");
                Err(rejected())
            }
        }
    }

    /// Requests currently holding a slot in `lane`
    pub fn active(&self, lane: Lane) -> usize {
        let (semaphore, limit) = self.lane(lane);
        limit.saturating_sub(semaphore.available_permits())
    }

    fn lane(&self, lane: Lane) -> (&Arc<Semaphore>, usize) {
        match lane {
            Lane::Streaming => (&self.streaming, self.streaming_limit),
            Lane::Completion => (&self.completions, self.completion_limit),
        }
    }
}
