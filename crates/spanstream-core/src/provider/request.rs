use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Sampling options forwarded to the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    /// Maximum tokens to generate
    pub num_predict: Option<u32>,
}

/// A generation request, streaming or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub options: ModelOptions,
    /// Chat-style (message) invocation rather than raw completion
    #[serde(default = "default_chat")]
    pub chat: bool,
    /// Per-request override of the consumer idle timeout
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
}

fn default_chat() -> bool {
    true
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            options: ModelOptions::default(),
            chat: default_chat(),
            idle_timeout_ms: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = Some((timeout.as_millis() as u64).max(1));
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Checks that do not depend on service configuration
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.model.trim().is_empty() {
            return Err(StreamError::InvalidRequest(
                "model name must not be empty".to_string(),
            ));
        }
        if self.idle_timeout_ms == Some(0) {
            return Err(StreamError::InvalidRequest(
                "idle_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal() {
        let request: CompletionRequest =
            serde_json::from_str(r#"{"model": "llama3", "prompt": "hi"}"#).unwrap();
        assert!(request.chat);
        assert_eq!(request.options, ModelOptions::default());
        assert_eq!(request.idle_timeout(), None);
    }

    #[test]
    fn test_deserialize_options() {
        let request: CompletionRequest = serde_json::from_str(
            r#"{"model": "m", "prompt": "p", "options": {"temperature": 0.2, "top_k": 40}, "idle_timeout_ms": 5000}"#,
        )
        .unwrap();
        assert_eq!(request.options.temperature, Some(0.2));
        assert_eq!(request.options.top_k, Some(40));
        assert_eq!(request.idle_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_validate() {
        assert!(CompletionRequest::new("m", "p").validate().is_ok());
        assert!(CompletionRequest::new("  ", "p").validate().is_err());

        let mut request = CompletionRequest::new("m", "p");
        request.idle_timeout_ms = Some(0);
        assert!(request.validate().is_err());
    }
}
