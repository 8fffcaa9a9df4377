//! Stream events
//!
//! Typed events emitted to the client, one JSON object per transport frame:
//! `{"id": ..., "event": ..., ...payload}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::error;

use crate::classify::TokenClass;
use crate::error::StreamError;

/// Closed set of event kinds on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Token,
    CodeStart,
    CodeToken,
    CodeEnd,
    MarkdownStart,
    MarkdownToken,
    MarkdownEnd,
    TitleGenerated,
    Progress,
    Metadata,
    Error,
    Done,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Token => "token",
            EventKind::CodeStart => "code_start",
            EventKind::CodeToken => "code_token",
            EventKind::CodeEnd => "code_end",
            EventKind::MarkdownStart => "markdown_start",
            EventKind::MarkdownToken => "markdown_token",
            EventKind::MarkdownEnd => "markdown_end",
            EventKind::TitleGenerated => "title_generated",
            EventKind::Progress => "progress",
            EventKind::Metadata => "metadata",
            EventKind::Error => "error",
            EventKind::Done => "done",
        }
    }

    /// `done` and `error` end a session; nothing may follow them
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Done | EventKind::Error)
    }
}

impl From<TokenClass> for EventKind {
    fn from(class: TokenClass) -> Self {
        match class {
            TokenClass::Token => EventKind::Token,
            TokenClass::MarkdownToken => EventKind::MarkdownToken,
            TokenClass::CodeToken => EventKind::CodeToken,
            TokenClass::CodeStart => EventKind::CodeStart,
            TokenClass::CodeEnd => EventKind::CodeEnd,
        }
    }
}

/// A single event in a session's ordered stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: String,
    #[serde(rename = "event")]
    pub kind: EventKind,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl StreamEvent {
    pub fn new(kind: EventKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            data: Map::new(),
        }
    }

    /// Add a payload field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Add a payload field only when present
    pub fn with_opt<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(|v| v.as_u64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(|v| v.as_bool())
    }

    /// Encode as a single-line JSON frame
    pub fn to_wire(&self) -> String {
        match serde_json::to_string(self) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Event encoding failed for {}: {}", self.id, e);
                serde_json::json!({
                    "id": self.id,
                    "event": EventKind::Error,
                    "error": format!("event encoding failed: {}", e),
                    "error_type": "EncodingError",
                })
                .to_string()
            }
        }
    }

    /// Decode a frame produced by `to_wire`
    pub fn from_wire(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// Current Unix time in milliseconds
pub fn timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Build the single terminal `error` event for a failed session
pub fn error_event(request_id: &str, err: &StreamError) -> StreamEvent {
    let suffix = match err {
        StreamError::Cancelled => "cancelled",
        StreamError::Timeout(_) => "timeout",
        _ => "error",
    };
    StreamEvent::new(EventKind::Error, format!("{}-{}", request_id, suffix))
        .with("error", err.to_string())
        .with("error_type", err.error_type())
        .with("request_id", request_id)
        .with("timestamp", timestamp_ms())
}
