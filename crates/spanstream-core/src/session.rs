//! Request session state
//!
//! Tracks token counts, timing and accumulated text for one streaming
//! request. Owned exclusively by that request's emitter.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::classify::{ContentState, TokenClass};

/// Lifecycle of a session. Terminal phases are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Failed | SessionPhase::Cancelled
        )
    }
}

/// Aggregate content-type counts reported in `metadata`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentSummary {
    pub text_tokens: usize,
    pub markdown_tokens: usize,
    pub code_tokens: usize,
    pub code_blocks: usize,
    /// Languages in first-seen order
    pub languages: Vec<String>,
}

impl ContentSummary {
    fn record(&mut self, class: TokenClass, language: Option<&str>) {
        match class {
            TokenClass::Token => self.text_tokens += 1,
            TokenClass::MarkdownToken => self.markdown_tokens += 1,
            TokenClass::CodeToken => self.code_tokens += 1,
            TokenClass::CodeStart => self.code_blocks += 1,
            TokenClass::CodeEnd => {}
        }
        if let Some(lang) = language {
            if !self.languages.iter().any(|l| l == lang) {
                self.languages.push(lang.to_string());
            }
        }
    }
}

/// Runtime state of one streaming request
#[derive(Debug)]
pub struct RequestSession {
    pub id: String,
    pub model: String,
    pub start_time: Instant,
    pub token_count: usize,
    /// Full generated text, markers included
    pub accumulated_text: String,
    pub title_extracted: bool,
    pub title: Option<String>,
    pub state: ContentState,
    pub phase: SessionPhase,
    pub summary: ContentSummary,
}

impl RequestSession {
    pub fn new(id: impl Into<String>, model: impl Into<String>, rolling_window: usize) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            start_time: Instant::now(),
            token_count: 0,
            accumulated_text: String::new(),
            title_extracted: false,
            title: None,
            state: ContentState::with_window(rolling_window),
            phase: SessionPhase::Idle,
            summary: ContentSummary::default(),
        }
    }

    /// Append a token; returns the byte offset where it starts in `accumulated_text`
    pub fn record_token(&mut self, token: &str) -> usize {
        let start = self.accumulated_text.len();
        self.accumulated_text.push_str(token);
        self.token_count += 1;
        start
    }

    pub fn record_class(&mut self, class: TokenClass, language: Option<&str>) {
        self.summary.record(class, language);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.token_count as f64 / secs
        } else {
            0.0
        }
    }
}

/// Cheap word-based token estimate (words x 1.3)
pub fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f64 * 1.3) as usize
}
