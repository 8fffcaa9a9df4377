//! Model Binding Cache
//!
//! Normalises request parameters into a `ModelBinding` and caches bindings
//! keyed by those parameters, so repeated requests for the same model
//! configuration share one handle. Bounded, with explicit eviction.

use std::sync::Arc;

use moka::sync::Cache;
use serde::Serialize;
use tracing::debug;

use crate::error::StreamError;
use crate::provider::CompletionRequest;

/// Normalised model configuration handed to the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelBinding {
    pub model: String,
    pub chat: bool,
    pub streaming: bool,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub num_predict: Option<u32>,
}

impl ModelBinding {
    /// Streaming chat binding with default sampling
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            chat: true,
            streaming: true,
            temperature: 0.7,
            top_p: None,
            top_k: None,
            num_predict: None,
        }
    }

    /// Validate and normalise a request's model parameters
    pub fn from_request(
        request: &CompletionRequest,
        streaming: bool,
        default_temperature: f32,
    ) -> Result<Self, StreamError> {
        request.validate()?;

        let temperature = request.options.temperature.unwrap_or(default_temperature);
        check_unit_range("temperature", temperature)?;
        if let Some(top_p) = request.options.top_p {
            check_unit_range("top_p", top_p)?;
        }

        Ok(Self {
            model: request.model.trim().to_string(),
            chat: request.chat,
            streaming,
            temperature,
            top_p: request.options.top_p,
            top_k: request.options.top_k,
            num_predict: request.options.num_predict,
        })
    }

    fn key(&self) -> BindingKey {
        BindingKey {
            model: self.model.clone(),
            chat: self.chat,
            streaming: self.streaming,
            temperature: self.temperature.to_bits(),
            top_p: self.top_p.map(f32::to_bits),
            top_k: self.top_k,
            num_predict: self.num_predict,
        }
    }
}

fn check_unit_range(name: &str, value: f32) -> Result<(), StreamError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(StreamError::InvalidRequest(format!(
            "{} must be between 0.0 and 1.0, got {}",
            name, value
        )))
    }
}

/// Hashable form of a binding (floats by bit pattern)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingKey {
    model: String,
    chat: bool,
    streaming: bool,
    temperature: u32,
    top_p: Option<u32>,
    top_k: Option<u32>,
    num_predict: Option<u32>,
}

/// Bounded binding cache
pub struct BindingCache {
    cache: Cache<BindingKey, Arc<ModelBinding>>,
    default_temperature: f32,
}

impl std::fmt::Debug for BindingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl BindingCache {
    pub fn new(capacity: u64, default_temperature: f32) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).build(),
            default_temperature,
        }
    }

    /// Validate the request and return the shared binding for its parameters
    pub fn resolve(
        &self,
        request: &CompletionRequest,
        streaming: bool,
    ) -> Result<Arc<ModelBinding>, StreamError> {
        let binding = ModelBinding::from_request(request, streaming, self.default_temperature)?;
        let key = binding.key();
        Ok(self.cache.get_with(key, || {
            debug!("Bindings: new binding for {}", binding.model);
            Arc::new(binding)
        }))
    }

    /// Drop a single binding
    pub fn invalidate(&self, binding: &ModelBinding) {
        self.cache.invalidate(&binding.key());
    }

    /// Drop every binding
    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    pub fn contains(&self, binding: &ModelBinding) -> bool {
        self.cache.contains_key(&binding.key())
    }

    /// Approximate entry count (eviction is applied lazily)
    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_params_share_binding() {
        let cache = BindingCache::new(8, 0.7);
        let a = cache.resolve(&CompletionRequest::new("llama3", "one"), true).unwrap();
        let b = cache.resolve(&CompletionRequest::new(" llama3 ", "two"), true).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.model, "llama3");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_different_params_get_distinct_bindings() {
        let cache = BindingCache::new(8, 0.7);
        let a = cache.resolve(&CompletionRequest::new("m", "p"), true).unwrap();
        let b = cache
            .resolve(&CompletionRequest::new("m", "p").with_temperature(0.1), true)
            .unwrap();
        let c = cache.resolve(&CompletionRequest::new("m", "p"), false).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.temperature, 0.7);
        assert_eq!(b.temperature, 0.1);
    }

    #[test]
    fn test_validation() {
        let cache = BindingCache::new(8, 0.7);
        let err = cache
            .resolve(&CompletionRequest::new("", "p"), true)
            .unwrap_err();
        assert_eq!(err.error_type(), "InvalidRequest");

        let err = cache
            .resolve(&CompletionRequest::new("m", "p").with_temperature(1.5), true)
            .unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = BindingCache::new(8, 0.7);
        let a = cache.resolve(&CompletionRequest::new("a", "p"), true).unwrap();
        cache.resolve(&CompletionRequest::new("b", "p"), true).unwrap();

        cache.invalidate(&a);
        assert!(!cache.contains(&a));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = BindingCache::new(4, 0.7);
        for i in 0..50 {
            cache
                .resolve(&CompletionRequest::new(format!("model-{}", i), "p"), true)
                .unwrap();
        }
        assert!(cache.len() <= 4);
    }
}
