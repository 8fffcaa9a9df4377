//! Model provider seam
//!
//! A provider turns a bound model and a request into an ordered stream of
//! signals. Transport (HTTP, local runtime, fixtures) lives behind the trait.

mod request;
pub mod scripted;

pub use request::{CompletionRequest, ModelOptions};
pub use scripted::{ChunkMode, ScriptedProvider};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::binding::ModelBinding;
use crate::error::StreamError;

/// Signals a provider yields while generating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderSignal {
    /// Generation began
    #[serde(rename = "start")]
    Start { model: String },

    /// One generated token
    #[serde(rename = "token")]
    Token { text: String },

    /// Generation finished normally
    #[serde(rename = "end")]
    End,

    /// Generation failed
    #[serde(rename = "error")]
    Error { message: String },
}

impl ProviderSignal {
    pub fn token(text: impl Into<String>) -> Self {
        ProviderSignal::Token { text: text.into() }
    }
}

/// Signal stream handed to the producer
pub type SignalStream = BoxStream<'static, ProviderSignal>;

/// Source of generated tokens.
///
/// A well-behaved stream yields `Start`, any number of `Token`s, then
/// exactly one of `End` or `Error`. Dropping the stream must stop
/// generation.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Begin generation. Failing here means the model could not be reached.
    async fn stream(
        &self,
        binding: &ModelBinding,
        request: &CompletionRequest,
    ) -> Result<SignalStream, StreamError>;
}
