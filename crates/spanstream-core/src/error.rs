//! Error taxonomy for streaming sessions
//!
//! Every failure a caller can observe maps to one variant here. The
//! `error_type()` string is what goes on the wire in `error` events.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while admitting, streaming or completing a request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The model provider reported a failure mid-stream
    #[error("upstream model error: {0}")]
    UpstreamModel(String),

    /// The session was cancelled from outside (client disconnect, shutdown)
    #[error("request cancelled")]
    Cancelled,

    /// No event arrived within the idle timeout
    #[error("streaming timeout after {0:?}")]
    Timeout(Duration),

    /// The concurrency limit was reached at session start
    #[error("admission rejected: {limit} sessions already active (waited {waited:?})")]
    AdmissionRejected { limit: usize, waited: Duration },

    /// The circuit breaker is open
    #[error("service temporarily unavailable")]
    ServiceUnavailable,

    /// The request failed validation before admission
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// The producer went away without delivering a terminal event
    #[error("producer ended unexpectedly: {0}")]
    ProducerLost(String),
}

impl StreamError {
    /// Classification string carried in the `error_type` field of `error` events
    pub fn error_type(&self) -> &'static str {
        match self {
            StreamError::UpstreamModel(_) => "UpstreamModelError",
            StreamError::Cancelled => "Cancelled",
            StreamError::Timeout(_) => "Timeout",
            StreamError::AdmissionRejected { .. } => "AdmissionRejected",
            StreamError::ServiceUnavailable => "ServiceUnavailable",
            StreamError::InvalidRequest(_) => "InvalidRequest",
            StreamError::Config(_) => "ConfigError",
            StreamError::ProducerLost(_) => "ProducerLost",
        }
    }

    /// Whether this failure should count against the circuit breaker.
    ///
    /// Client-side cancellation and caller mistakes say nothing about the
    /// health of the model backend.
    pub fn counts_as_backend_failure(&self) -> bool {
        matches!(
            self,
            StreamError::UpstreamModel(_) | StreamError::Timeout(_) | StreamError::ProducerLost(_)
        )
    }
}
