//! Stream service
//!
//! Entry point that ties admission, bindings, the provider and the delivery
//! pipeline together. One service is shared by every request.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::admission::{AdmissionGate, BreakerState, CircuitBreaker, Lane};
use crate::binding::{BindingCache, ModelBinding};
use crate::config::StreamConfig;
use crate::delivery::{DeliveryStream, Producer, ProducerCancellation};
use crate::emitter::EventEmitter;
use crate::error::StreamError;
use crate::provider::{CompletionRequest, ModelProvider, ProviderSignal};
use crate::session::estimate_tokens;
use crate::title::{find_title, strip_all_markers};

/// Result of a non-streaming completion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub request_id: String,
    pub model: String,
    /// Generated text with title markers removed
    pub response: String,
    pub title: Option<String>,
    pub total_duration_ms: u64,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// Snapshot for health endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub breaker: BreakerState,
    pub active_streams: usize,
    pub active_completions: usize,
}

pub struct StreamService {
    config: StreamConfig,
    provider: Arc<dyn ModelProvider>,
    admission: AdmissionGate,
    breaker: Arc<CircuitBreaker>,
    bindings: BindingCache,
}

impl StreamService {
    pub fn new(config: StreamConfig, provider: Arc<dyn ModelProvider>) -> Result<Self, StreamError> {
        config.validate()?;
        info!(
            provider = provider.name(),
            max_streams = config.max_streaming_sessions,
            max_completions = config.max_completions,
            "Service: Initialized"
        );
        Ok(Self {
            admission: AdmissionGate::from_config(&config),
            breaker: Arc::new(CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_recovery(),
            )),
            bindings: BindingCache::new(config.binding_cache_capacity, config.default_temperature),
            provider,
            config,
        })
    }

    /// Admit a streaming request and start its producer.
    ///
    /// Validation, breaker and admission failures are returned directly;
    /// once a stream is returned every failure arrives as its `error` event.
    pub async fn open_stream(&self, request: CompletionRequest) -> Result<DeliveryStream, StreamError> {
        let binding = self.bindings.resolve(&request, true)?;
        self.breaker.check()?;
        let permit = self.admission.admit(Lane::Streaming).await?;

        let request_id = Uuid::new_v4().to_string();
        let idle_timeout = request
            .idle_timeout()
            .unwrap_or_else(|| self.config.idle_timeout());

        info!(
            request_id = %request_id,
            model = %binding.model,
            idle_timeout_ms = idle_timeout.as_millis() as u64,
            "Service: Stream admitted"
        );

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let cancel = ProducerCancellation::new();
        let emitter = EventEmitter::new(&request_id, &binding.model, &self.config);
        let producer = Producer::new(emitter, tx, cancel.clone());
        let provider = self.provider.clone();

        let handle = tokio::spawn(async move {
            // Slot is released when the producer finishes
            let _permit = permit;
            producer.run(provider, binding, request).await
        });

        Ok(DeliveryStream::new(request_id, rx, idle_timeout, cancel, handle)
            .with_breaker(self.breaker.clone()))
    }

    /// Run a request to completion and return the whole response
    pub async fn complete(&self, request: CompletionRequest) -> Result<Completion, StreamError> {
        let binding = self.bindings.resolve(&request, false)?;
        self.breaker.check()?;
        let _permit = self.admission.admit(Lane::Completion).await?;

        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let limit = self.config.completion_timeout();

        let result = match timeout(limit, self.collect(&binding, &request)).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::Timeout(limit)),
        };

        let text = match result {
            Ok(text) => {
                self.breaker.record_success();
                text
            }
            Err(e) => {
                if e.counts_as_backend_failure() {
                    self.breaker.record_failure();
                }
                warn!(request_id = %request_id, error_type = e.error_type(), "Service: Completion failed: {}", e);
                return Err(e);
            }
        };

        let prompt_tokens = estimate_tokens(&request.prompt)
            + request.system.as_deref().map(estimate_tokens).unwrap_or(0);
        let completion = Completion {
            request_id,
            model: binding.model.clone(),
            title: find_title(&text),
            response: strip_all_markers(&text),
            total_duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens,
            completion_tokens: estimate_tokens(&text),
        };
        info!(
            request_id = %completion.request_id,
            duration_ms = completion.total_duration_ms,
            "Service: Completion finished"
        );
        Ok(completion)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            breaker: self.breaker.state(),
            active_streams: self.admission.active(Lane::Streaming),
            active_completions: self.admission.active(Lane::Completion),
        }
    }

    async fn collect(
        &self,
        binding: &ModelBinding,
        request: &CompletionRequest,
    ) -> Result<String, StreamError> {
        let mut signals = self.provider.stream(binding, request).await?;
        let mut text = String::new();
        while let Some(signal) = signals.next().await {
            match signal {
                ProviderSignal::Start { .. } => {}
                ProviderSignal::Token { text: token } => text.push_str(&token),
                ProviderSignal::End => return Ok(text),
                ProviderSignal::Error { message } => {
                    return Err(StreamError::UpstreamModel(message))
                }
            }
        }
        Err(StreamError::UpstreamModel(
            "model stream ended without a terminal signal".to_string(),
        ))
    }
}
