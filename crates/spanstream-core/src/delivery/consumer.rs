//! Consumer side of a streaming session
//!
//! Reads events from the session channel under an idle timeout and owns
//! the producer's lifetime: on every exit path (terminal event, timeout,
//! lost producer, client disconnect) it cancels the producer and waits for
//! the task to finish before reporting the outcome.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::cancellation::ProducerCancellation;
use super::producer::SessionReport;
use crate::admission::CircuitBreaker;
use crate::error::StreamError;
use crate::events::{error_event, StreamEvent};

type ProducerHandle = JoinHandle<Result<SessionReport, StreamError>>;

/// Ordered, single-consumer event stream for one session
pub struct DeliveryStream {
    request_id: String,
    rx: mpsc::Receiver<StreamEvent>,
    idle_timeout: Duration,
    cancel: ProducerCancellation,
    producer: Option<ProducerHandle>,
    breaker: Option<Arc<CircuitBreaker>>,
    outcome: Option<Result<SessionReport, StreamError>>,
    finished: bool,
}

impl DeliveryStream {
    pub(crate) fn new(
        request_id: String,
        rx: mpsc::Receiver<StreamEvent>,
        idle_timeout: Duration,
        cancel: ProducerCancellation,
        producer: ProducerHandle,
    ) -> Self {
        Self {
            request_id,
            rx,
            idle_timeout,
            cancel,
            producer: Some(producer),
            breaker: None,
            outcome: None,
            finished: false,
        }
    }

    /// Report the session's outcome to a circuit breaker when it ends
    pub(crate) fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// True once a terminal event has been handed out or the stream was cancelled
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The producer's result, available once the stream is finished
    pub fn outcome(&self) -> Option<&Result<SessionReport, StreamError>> {
        self.outcome.as_ref()
    }

    /// Next event, or `None` after the terminal event.
    ///
    /// If nothing arrives within the idle timeout a synthesized `error`
    /// event (`Timeout`) is returned and the producer is cancelled.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        match timeout(self.idle_timeout, self.rx.recv()).await {
            Ok(Some(event)) => {
                if event.is_terminal() {
                    self.shutdown(None).await;
                }
                Some(event)
            }
            Ok(None) => {
                let err = StreamError::ProducerLost(
                    "event channel closed before a terminal event".to_string(),
                );
                warn!(request_id = %self.request_id, "Delivery: {}", err);
                let event = error_event(&self.request_id, &err);
                self.shutdown(Some(err)).await;
                Some(event)
            }
            Err(_) => {
                let err = StreamError::Timeout(self.idle_timeout);
                warn!(
                    request_id = %self.request_id,
                    "Delivery: No event within {:?}, cancelling producer",
                    self.idle_timeout
                );
                let event = error_event(&self.request_id, &err);
                self.shutdown(Some(err)).await;
                Some(event)
            }
        }
    }

    /// Next event encoded as a wire frame
    pub async fn next_frame(&mut self) -> Option<String> {
        self.next_event().await.map(|event| event.to_wire())
    }

    /// Client went away: stop the producer and wait for it.
    /// No further events are delivered.
    pub async fn cancel(&mut self) {
        if self.finished {
            return;
        }
        info!(request_id = %self.request_id, "Delivery: Client disconnected");
        self.shutdown(None).await;
    }

    /// Adapt into a `Stream` of events
    pub fn into_events(self) -> impl Stream<Item = StreamEvent> + Send {
        stream::unfold(self, |mut delivery| async move {
            delivery.next_event().await.map(|event| (event, delivery))
        })
    }

    /// Adapt into a `Stream` of wire frames
    pub fn into_frames(self) -> impl Stream<Item = String> + Send {
        stream::unfold(self, |mut delivery| async move {
            delivery.next_frame().await.map(|frame| (frame, delivery))
        })
    }

    /// Cancel the producer, wait for it, record the outcome
    async fn shutdown(&mut self, consumer_error: Option<StreamError>) {
        self.finished = true;
        self.cancel.cancel();

        if let Some(handle) = self.producer.take() {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(StreamError::ProducerLost(format!("producer task failed: {}", e))),
            };
            debug!(
                request_id = %self.request_id,
                ok = result.is_ok(),
                "Delivery: Producer acknowledged shutdown"
            );
            self.outcome = Some(result);
        }
        self.rx.close();

        if let Some(breaker) = &self.breaker {
            match (&consumer_error, &self.outcome) {
                (Some(err), _) | (None, Some(Err(err))) => {
                    if err.counts_as_backend_failure() {
                        breaker.record_failure();
                    }
                }
                (None, Some(Ok(_))) => breaker.record_success(),
                (None, None) => {}
            }
        }
    }
}

impl Drop for DeliveryStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!(request_id = %self.request_id, "Delivery: Dropped before finish, cancelling producer");
            self.cancel.cancel();
        }
    }
}
