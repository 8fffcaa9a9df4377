//! Scripted provider
//!
//! Replays a fixed token sequence. Used by the replay CLI and by tests to
//! drive the pipeline without a model backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::debug;

use super::{CompletionRequest, ModelProvider, ProviderSignal, SignalStream};
use crate::binding::ModelBinding;
use crate::error::StreamError;

/// How to cut source text into tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkMode {
    /// One token per character
    Chars,
    /// Words with their trailing whitespace
    #[default]
    Words,
    /// Lines with their trailing newline
    Lines,
}

impl ChunkMode {
    pub fn split(&self, text: &str) -> Vec<String> {
        match self {
            ChunkMode::Chars => text.chars().map(|c| c.to_string()).collect(),
            ChunkMode::Words => split_words(text),
            ChunkMode::Lines => text.split_inclusive('\n').map(str::to_string).collect(),
        }
    }
}

/// Split after each whitespace run so concatenation restores the input
fn split_words(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_space = false;
    for c in text.chars() {
        if in_space && !c.is_whitespace() {
            tokens.push(std::mem::take(&mut current));
        }
        in_space = c.is_whitespace();
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Fixture provider with optional pacing and failure injection
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    tokens: Vec<String>,
    delay: Duration,
    /// Emit an upstream error after this many tokens
    fail_after: Option<(usize, String)>,
    /// Refuse to open the stream at all
    unreachable: Option<String>,
    /// Never yield anything
    silent: bool,
    /// Stop after the tokens without a terminal signal
    truncated: bool,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from_text(text: &str, mode: ChunkMode) -> Self {
        Self::new(mode.split(text))
    }

    /// A provider that accepts the request and then never produces a signal
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// A provider whose backend cannot be reached
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            unreachable: Some(message.into()),
            ..Self::default()
        }
    }

    /// Pause before every signal
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_after(mut self, tokens: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((tokens, message.into()));
        self
    }

    /// End the stream without `End` or `Error`
    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    /// How many streams have been opened
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn script(&self, model: &str) -> Vec<ProviderSignal> {
        let mut signals = vec![ProviderSignal::Start {
            model: model.to_string(),
        }];
        let limit = self
            .fail_after
            .as_ref()
            .map(|(n, _)| *n)
            .unwrap_or(self.tokens.len());
        signals.extend(
            self.tokens
                .iter()
                .take(limit)
                .map(|t| ProviderSignal::token(t.clone())),
        );
        match (&self.fail_after, self.truncated) {
            (Some((_, message)), _) => signals.push(ProviderSignal::Error {
                message: message.clone(),
            }),
            (None, false) => signals.push(ProviderSignal::End),
            (None, true) => {}
        }
        signals
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        binding: &ModelBinding,
        _request: &CompletionRequest,
    ) -> Result<SignalStream, StreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.unreachable {
            return Err(StreamError::UpstreamModel(message.clone()));
        }
        if self.silent {
            debug!("Scripted: silent stream for {}", binding.model);
            return Ok(stream::pending().boxed());
        }

        let signals = self.script(&binding.model);
        debug!("Scripted: replaying {} signals for {}", signals.len(), binding.model);

        let delay = self.delay;
        if delay.is_zero() {
            return Ok(stream::iter(signals).boxed());
        }
        Ok(stream::iter(signals)
            .then(move |signal| async move {
                tokio::time::sleep(delay).await;
                signal
            })
            .boxed())
    }
}
