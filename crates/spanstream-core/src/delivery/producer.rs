//! Producer task
//!
//! Drives a provider's signal stream through the emitter and pushes the
//! resulting events into the session channel. Runs as its own tokio task
//! and stops promptly once its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::cancellation::ProducerCancellation;
use crate::binding::ModelBinding;
use crate::emitter::EventEmitter;
use crate::error::StreamError;
use crate::events::StreamEvent;
use crate::provider::{CompletionRequest, ModelProvider, ProviderSignal};
use crate::session::SessionPhase;

/// Summary of a session the producer finished normally
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub request_id: String,
    pub model: String,
    pub tokens: usize,
    pub duration: Duration,
    pub title: Option<String>,
    pub phase: SessionPhase,
}

pub(crate) struct Producer {
    emitter: EventEmitter,
    tx: mpsc::Sender<StreamEvent>,
    cancel: ProducerCancellation,
}

impl Producer {
    pub(crate) fn new(
        emitter: EventEmitter,
        tx: mpsc::Sender<StreamEvent>,
        cancel: ProducerCancellation,
    ) -> Self {
        Self {
            emitter,
            tx,
            cancel,
        }
    }

    /// Run the session to a terminal event.
    ///
    /// Returns the report on `done`, or the error that ended the session.
    pub(crate) async fn run(
        mut self,
        provider: Arc<dyn ModelProvider>,
        binding: Arc<ModelBinding>,
        request: CompletionRequest,
    ) -> Result<SessionReport, StreamError> {
        debug!(
            request_id = %self.emitter.request_id(),
            provider = provider.name(),
            model = %binding.model,
            "Producer: Opening model stream"
        );

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return self.abort(),
            opened = provider.stream(&binding, &request) => opened,
        };
        let mut signals = match opened {
            Ok(signals) => signals,
            Err(e) => {
                let events = self.emitter.on_error(&e);
                if self.deliver_all(events).await.is_err() {
                    return self.abort();
                }
                return Err(e);
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.abort(),
                next = signals.next() => next,
            };

            let (events, outcome) = match next {
                Some(ProviderSignal::Start { model }) => (self.emitter.on_start(Some(&model)), None),
                Some(ProviderSignal::Token { text }) => (self.emitter.on_token(&text), None),
                Some(ProviderSignal::End) => (self.emitter.on_end(), Some(Ok(()))),
                Some(ProviderSignal::Error { message }) => {
                    let err = StreamError::UpstreamModel(message);
                    (self.emitter.on_error(&err), Some(Err(err)))
                }
                None => {
                    let err = StreamError::UpstreamModel(
                        "model stream ended without a terminal signal".to_string(),
                    );
                    (self.emitter.on_error(&err), Some(Err(err)))
                }
            };

            if self.deliver_all(events).await.is_err() {
                return self.abort();
            }
            if let Some(outcome) = outcome {
                return outcome.map(|()| self.report());
            }
        }
    }

    /// Send in order, giving up as soon as cancellation is requested
    async fn deliver_all(&self, events: Vec<StreamEvent>) -> Result<(), StreamError> {
        for event in events {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StreamError::Cancelled),
                sent = self.tx.send(event) => {
                    // Receiver gone means nobody is listening any more
                    sent.map_err(|_| StreamError::Cancelled)?;
                }
            }
        }
        Ok(())
    }

    /// Stop without blocking: the cancellation event is best-effort
    fn abort(&mut self) -> Result<SessionReport, StreamError> {
        info!(
            request_id = %self.emitter.request_id(),
            tokens = self.emitter.session().token_count,
            "Producer: Cancelled"
        );
        for event in self.emitter.on_cancel() {
            let _ = self.tx.try_send(event);
        }
        Err(StreamError::Cancelled)
    }

    fn report(&self) -> SessionReport {
        let session = self.emitter.session();
        SessionReport {
            request_id: session.id.clone(),
            model: session.model.clone(),
            tokens: session.token_count,
            duration: session.elapsed(),
            title: session.title.clone(),
            phase: session.phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::events::EventKind;
    use crate::provider::ScriptedProvider;

    fn producer(
        capacity: usize,
    ) -> (Producer, mpsc::Receiver<StreamEvent>, ProducerCancellation) {
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = ProducerCancellation::new();
        let emitter = EventEmitter::new("req", "test-model", &StreamConfig::default());
        (Producer::new(emitter, tx, cancel.clone()), rx, cancel)
    }

    fn args() -> (Arc<ModelBinding>, CompletionRequest) {
        (
            Arc::new(ModelBinding::new("test-model")),
            CompletionRequest::new("test-model", "p"),
        )
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_run_to_done() {
        let (producer, rx, _cancel) = producer(64);
        let (binding, request) = args();
        let provider = Arc::new(ScriptedProvider::new(["Hello", " world"]));

        let report = producer.run(provider, binding, request).await.unwrap();
        assert_eq!(report.tokens, 2);
        assert_eq!(report.phase, SessionPhase::Completed);

        let events = drain(rx).await;
        assert_eq!(events.first().unwrap().kind, EventKind::Start);
        assert_eq!(events.last().unwrap().kind, EventKind::Done);
    }

    #[tokio::test]
    async fn test_upstream_error_surfaces() {
        let (producer, rx, _cancel) = producer(64);
        let (binding, request) = args();
        let provider = Arc::new(ScriptedProvider::new(["a", "b"]).fail_after(1, "model crashed"));

        let err = producer.run(provider, binding, request).await.unwrap_err();
        assert_eq!(err, StreamError::UpstreamModel("model crashed".into()));

        let events = drain(rx).await;
        let errors: Vec<_> = events.iter().filter(|e| e.kind == EventKind::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(events.last().unwrap().kind, EventKind::Error);
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        let (producer, rx, _cancel) = producer(64);
        let (binding, request) = args();
        let provider = Arc::new(ScriptedProvider::unreachable("connection refused"));

        let err = producer.run(provider, binding, request).await.unwrap_err();
        assert_eq!(err.error_type(), "UpstreamModelError");
        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "req-error");
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let (producer, rx, _cancel) = producer(64);
        let (binding, request) = args();
        let provider = Arc::new(ScriptedProvider::new(["a"]).truncated());

        assert!(producer.run(provider, binding, request).await.is_err());
        let events = drain(rx).await;
        assert_eq!(events.last().unwrap().kind, EventKind::Error);
    }

    #[tokio::test]
    async fn test_cancel_stops_silent_provider() {
        let (producer, rx, cancel) = producer(64);
        let (binding, request) = args();
        let provider = Arc::new(ScriptedProvider::silent());

        let handle = tokio::spawn(producer.run(provider, binding, request));
        cancel.cancel();
        let result = handle.await.unwrap();
        assert_eq!(result.unwrap_err(), StreamError::Cancelled);

        let events = drain(rx).await;
        assert!(events.len() <= 1);
        if let Some(event) = events.first() {
            assert_eq!(event.id, "req-cancelled");
        }
    }

    #[tokio::test]
    async fn test_cancel_unblocks_full_channel() {
        let (producer, rx, cancel) = producer(1);
        let (binding, request) = args();
        let tokens: Vec<String> = (0..100).map(|i| format!("t{} ", i)).collect();
        let provider = Arc::new(ScriptedProvider::new(tokens));

        let handle = tokio::spawn(producer.run(provider, binding, request));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("producer should stop after cancellation")
            .unwrap();
        assert_eq!(result.unwrap_err(), StreamError::Cancelled);
        drop(rx);
    }
}
