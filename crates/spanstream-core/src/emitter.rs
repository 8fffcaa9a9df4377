//! Event Emitter
//!
//! Turns provider callbacks (start / token / end / error) into the ordered
//! event stream for one session. Owns the session state, the content
//! tracker and the title extractor, so it is the only writer of all three.
//!
//! Phases: `Idle -> Streaming -> Completed | Failed | Cancelled`. Terminal
//! phases absorb every later callback.

use tracing::{debug, info, warn};

use crate::classify::{ContentKind, TokenClass};
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::events::{error_event, timestamp_ms, EventKind, StreamEvent};
use crate::session::{estimate_tokens, RequestSession, SessionPhase};
use crate::title::TitleExtractor;

pub struct EventEmitter {
    session: RequestSession,
    titles: TitleExtractor,
    progress_interval: usize,
    /// Between a `markdown_start` and its `markdown_end`
    in_markdown_span: bool,
}

impl EventEmitter {
    pub fn new(request_id: &str, model: &str, config: &StreamConfig) -> Self {
        Self {
            session: RequestSession::new(request_id, model, config.rolling_window),
            titles: TitleExtractor::new(config.title_interval),
            progress_interval: config.progress_interval.max(1),
            in_markdown_span: false,
        }
    }

    pub fn session(&self) -> &RequestSession {
        &self.session
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase
    }

    pub fn request_id(&self) -> &str {
        &self.session.id
    }

    /// Generation started. Idempotent; a second call emits nothing.
    pub fn on_start(&mut self, model: Option<&str>) -> Vec<StreamEvent> {
        if self.session.phase != SessionPhase::Idle {
            if self.session.phase.is_terminal() {
                warn!(request_id = %self.session.id, "Emitter: start after terminal phase ignored");
            }
            return Vec::new();
        }
        if let Some(model) = model.filter(|m| !m.is_empty()) {
            self.session.model = model.to_string();
        }
        vec![self.begin()]
    }

    /// One generated token: zero or more boundary events, exactly one content
    /// event, then possibly a progress event.
    pub fn on_token(&mut self, token: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        match self.session.phase {
            SessionPhase::Idle => events.push(self.begin()),
            SessionPhase::Streaming => {}
            phase => {
                warn!(request_id = %self.session.id, ?phase, "Emitter: token after terminal phase dropped");
                return events;
            }
        }

        let token_start = self.session.record_token(token);
        let classification = self.session.state.classify(token);
        let visible = self
            .titles
            .strip_markers(&self.session.accumulated_text, token_start);

        if self.titles.is_due(&self.session, token) {
            if let Some(title) = self.titles.try_extract(&mut self.session) {
                events.push(self.title_event(&title));
            }
        }

        for transition in classification.preceding {
            self.session
                .record_class(transition.class, transition.language.as_deref());
            events.push(self.boundary_event(transition.class, transition.language));
        }

        match classification.class {
            TokenClass::MarkdownToken if !self.in_markdown_span => {
                self.in_markdown_span = true;
                events.push(self.boundary(EventKind::MarkdownStart));
            }
            TokenClass::Token if self.in_markdown_span => {
                self.in_markdown_span = false;
                events.push(self.boundary(EventKind::MarkdownEnd));
            }
            _ => {}
        }

        self.session
            .record_class(classification.class, classification.language.as_deref());
        events.push(self.content_event(classification.class, visible, classification.language));

        if self.session.token_count % self.progress_interval == 0 {
            events.push(self.progress_event());
        }
        events
    }

    /// Generation finished: final title attempt, forced fence close if a
    /// block is still open, then `metadata` and `done`.
    pub fn on_end(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        match self.session.phase {
            SessionPhase::Idle => events.push(self.begin()),
            SessionPhase::Streaming => {}
            phase => {
                warn!(request_id = %self.session.id, ?phase, "Emitter: end after terminal phase ignored");
                return events;
            }
        }

        if let Some(title) = self.titles.try_extract(&mut self.session) {
            events.push(self.title_event(&title));
        }

        let open_language = self.session.state.code_language.clone();
        if self.session.state.force_close() {
            debug!(request_id = %self.session.id, "Emitter: closing dangling code block");
            events.push(
                self.boundary_event(TokenClass::CodeEnd, open_language)
                    .with("synthetic", true),
            );
        }

        events.push(self.metadata_event());
        self.session.phase = SessionPhase::Completed;
        events.push(self.stamp(StreamEvent::new(
            EventKind::Done,
            format!("{}-done", self.session.id),
        )));

        info!(
            request_id = %self.session.id,
            tokens = self.session.token_count,
            elapsed_ms = self.session.elapsed().as_millis() as u64,
            "Emitter: Stream completed"
        );
        events
    }

    /// Generation failed or was cancelled: exactly one `error` event.
    /// A dangling code block is not closed.
    pub fn on_error(&mut self, err: &StreamError) -> Vec<StreamEvent> {
        if self.session.phase.is_terminal() {
            debug!(request_id = %self.session.id, "Emitter: error after terminal phase ignored");
            return Vec::new();
        }
        self.session.phase = match err {
            StreamError::Cancelled => SessionPhase::Cancelled,
            _ => SessionPhase::Failed,
        };

        warn!(
            request_id = %self.session.id,
            error_type = err.error_type(),
            tokens = self.session.token_count,
            "Emitter: Stream ended with error: {}",
            err
        );
        vec![error_event(&self.session.id, err)]
    }

    pub fn on_cancel(&mut self) -> Vec<StreamEvent> {
        self.on_error(&StreamError::Cancelled)
    }

    fn begin(&mut self) -> StreamEvent {
        self.session.phase = SessionPhase::Streaming;
        debug!(request_id = %self.session.id, model = %self.session.model, "Emitter: Stream started");
        self.stamp(StreamEvent::new(EventKind::Start, self.session.id.clone()))
            .with("model", self.session.model.clone())
    }

    /// Attach the fields every event carries
    fn stamp(&self, event: StreamEvent) -> StreamEvent {
        event
            .with("request_id", self.session.id.clone())
            .with("timestamp", timestamp_ms())
    }

    fn boundary(&self, kind: EventKind) -> StreamEvent {
        let id = format!(
            "{}-{}-{}",
            self.session.id,
            kind.as_str(),
            self.session.token_count
        );
        self.stamp(StreamEvent::new(kind, id))
    }

    /// Standalone fence transition with no token text
    fn boundary_event(&self, class: TokenClass, language: Option<String>) -> StreamEvent {
        let in_code_block = class == TokenClass::CodeStart;
        self.boundary(EventKind::from(class))
            .with("in_code_block", in_code_block)
            .with_opt("language", language)
    }

    fn title_event(&self, title: &str) -> StreamEvent {
        info!(request_id = %self.session.id, title = %title, "Emitter: Title extracted");
        self.boundary(EventKind::TitleGenerated)
            .with("title", title.to_string())
    }

    fn content_event(
        &self,
        class: TokenClass,
        visible: String,
        language: Option<String>,
    ) -> StreamEvent {
        let kind = EventKind::from(class);

        let content_type = match class {
            TokenClass::Token => ContentKind::Text,
            TokenClass::MarkdownToken => ContentKind::Markdown,
            TokenClass::CodeToken | TokenClass::CodeStart | TokenClass::CodeEnd => {
                ContentKind::Code
            }
        };
        let id = format!("{}-{}", self.session.id, self.session.token_count);
        self.stamp(StreamEvent::new(kind, id))
            .with("token", visible)
            .with("count", self.session.token_count)
            .with("content_type", content_type.as_str())
            .with("in_code_block", self.session.state.in_code_block)
            .with_opt("language", language)
    }

    fn progress_event(&self) -> StreamEvent {
        let state = &self.session.state;
        let id = format!("{}-progress-{}", self.session.id, self.session.token_count);
        self.stamp(StreamEvent::new(EventKind::Progress, id))
            .with("count", self.session.token_count)
            .with("elapsed", self.session.elapsed().as_secs_f64())
            .with("tokens_per_second", self.session.tokens_per_second())
            .with("content_type", state.kind.as_str())
            .with("in_code_block", state.in_code_block)
            .with_opt("language", state.code_language.clone())
    }

    fn metadata_event(&self) -> StreamEvent {
        let session = &self.session;
        let summary = &session.summary;
        self.stamp(StreamEvent::new(
            EventKind::Metadata,
            format!("{}-metadata", session.id),
        ))
        .with("model", session.model.clone())
        .with("total_tokens", session.token_count)
        .with("total_duration", session.elapsed().as_millis() as u64)
        .with("tokens_per_second", session.tokens_per_second())
        .with("estimated_tokens", estimate_tokens(&session.accumulated_text))
        .with("text_tokens", summary.text_tokens)
        .with("markdown_tokens", summary.markdown_tokens)
        .with("code_tokens", summary.code_tokens)
        .with("code_blocks", summary.code_blocks)
        .with("languages", summary.languages.clone())
        .with("content_type", session.state.kind.as_str())
        .with_opt("title", session.title.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter() -> EventEmitter {
        EventEmitter::new("req", "test-model", &StreamConfig::default())
    }

    fn run(tokens: &[&str]) -> Vec<StreamEvent> {
        let mut emitter = emitter();
        let mut events = emitter.on_start(None);
        for token in tokens {
            events.extend(emitter.on_token(token));
        }
        events.extend(emitter.on_end());
        events
    }

    fn kinds(events: &[StreamEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    fn count(events: &[StreamEvent], kind: EventKind) -> usize {
        events.iter().filter(|e| e.kind == kind).count()
    }

    #[test]
    fn test_python_block_sequence() {
        let events = run(&["```python\n", "def f():\n", "    pass\n", "```"]);
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::Start,
                EventKind::CodeStart,
                EventKind::CodeToken,
                EventKind::CodeToken,
                EventKind::CodeEnd,
                EventKind::Metadata,
                EventKind::Done,
            ]
        );
        assert_eq!(events[1].get_str("language"), Some("python"));
        assert_eq!(events[1].get_str("token"), Some("```python\n"));
        assert_eq!(events[4].get_str("language"), Some("python"));
        assert_eq!(events[4].get_bool("in_code_block"), Some(false));
    }

    #[test]
    fn test_bold_char_by_char() {
        let tokens: Vec<String> = "**hello** world".chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        let events = run(&refs);

        assert_eq!(count(&events, EventKind::MarkdownToken), tokens.len());
        assert_eq!(count(&events, EventKind::MarkdownStart), 1);
        assert_eq!(count(&events, EventKind::MarkdownEnd), 0);
        assert_eq!(events[1].kind, EventKind::MarkdownStart);
    }

    #[test]
    fn test_markdown_end_when_prose_resumes() {
        let mut emitter = EventEmitter::new(
            "req",
            "m",
            &StreamConfig {
                rolling_window: 20,
                ..StreamConfig::default()
            },
        );
        let mut events = emitter.on_token("**x** ");
        for _ in 0..30 {
            events.extend(emitter.on_token("a"));
        }
        assert_eq!(count(&events, EventKind::MarkdownStart), 1);
        assert_eq!(count(&events, EventKind::MarkdownEnd), 1);
    }

    #[test]
    fn test_title_single_token() {
        let events = run(&["<TITLE>Quarterly Report</TITLE>", "Numbers are up."]);
        let titles: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::TitleGenerated)
            .collect();
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].get_str("title"), Some("Quarterly Report"));

        let visible: String = events
            .iter()
            .filter(|e| e.kind == EventKind::Token)
            .filter_map(|e| e.get_str("token"))
            .collect();
        assert!(!visible.contains("TITLE"));
        assert_eq!(visible, "Numbers are up.");

        let metadata = events.iter().find(|e| e.kind == EventKind::Metadata).unwrap();
        assert_eq!(metadata.get_str("title"), Some("Quarterly Report"));
    }

    #[test]
    fn test_empty_token_does_not_leak_title() {
        let events = run(&["<TITLE>Hi", "", " there</TITLE>", "after"]);
        let visible: String = events.iter().filter_map(|e| e.get_str("token")).collect();
        assert!(!visible.contains("TITLE"));
        assert_eq!(visible, "after");

        let title = events
            .iter()
            .find(|e| e.kind == EventKind::TitleGenerated)
            .unwrap();
        assert_eq!(title.get_str("title"), Some("Hi there"));
    }

    #[test]
    fn test_title_emitted_at_most_once() {
        let events = run(&["<TITLE>A</TITLE>", "<TITLE>B</TITLE>", "text"]);
        assert_eq!(count(&events, EventKind::TitleGenerated), 1);
    }

    #[test]
    fn test_title_found_at_end() {
        let mut emitter = emitter();
        let mut events = Vec::new();
        for token in ["<TIT", "LE>Late", "</TITLE"] {
            events.extend(emitter.on_token(token));
        }
        events.extend(emitter.on_token(">"));
        assert_eq!(count(&events, EventKind::TitleGenerated), 1);
    }

    #[test]
    fn test_progress_every_interval() {
        let tokens = vec!["w "; 60];
        let events = run(&tokens);
        let progress: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::Progress)
            .collect();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].id, "req-progress-25");
        assert_eq!(progress[0].get_u64("count"), Some(25));
        assert_eq!(progress[1].id, "req-progress-50");
    }

    #[test]
    fn test_dangling_block_closed_at_end() {
        let events = run(&["```rust\n", "fn main() {}\n"]);
        assert_eq!(count(&events, EventKind::CodeStart), 1);
        assert_eq!(count(&events, EventKind::CodeEnd), 1);

        let n = events.len();
        assert_eq!(events[n - 3].kind, EventKind::CodeEnd);
        assert_eq!(events[n - 3].get_bool("synthetic"), Some(true));
        assert_eq!(events[n - 3].get_str("language"), Some("rust"));
        assert_eq!(events[n - 2].kind, EventKind::Metadata);
        assert_eq!(events[n - 1].kind, EventKind::Done);
    }

    #[test]
    fn test_error_leaves_block_open() {
        let mut emitter = emitter();
        let mut events = emitter.on_token("```rust\n");
        events.extend(emitter.on_error(&StreamError::UpstreamModel("boom".into())));
        assert_eq!(count(&events, EventKind::CodeEnd), 0);
        assert_eq!(events.last().unwrap().kind, EventKind::Error);
        assert_eq!(events.last().unwrap().id, "req-error");
        assert_eq!(emitter.phase(), SessionPhase::Failed);
    }

    #[test]
    fn test_terminal_phase_absorbs_callbacks() {
        let mut emitter = emitter();
        emitter.on_token("hi");
        emitter.on_end();
        assert!(emitter.on_token("late").is_empty());
        assert!(emitter.on_end().is_empty());
        assert!(emitter.on_error(&StreamError::Cancelled).is_empty());
        assert_eq!(emitter.phase(), SessionPhase::Completed);
    }

    #[test]
    fn test_cancel_phase() {
        let mut emitter = emitter();
        emitter.on_token("hi");
        let events = emitter.on_cancel();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "req-cancelled");
        assert_eq!(emitter.phase(), SessionPhase::Cancelled);
    }

    #[test]
    fn test_implicit_start_on_first_token() {
        let mut emitter = emitter();
        let events = emitter.on_token("Hello");
        assert_eq!(kinds(&events), vec![EventKind::Start, EventKind::Token]);
        assert_eq!(events[0].id, "req");
        assert_eq!(events[1].id, "req-1");
        assert!(emitter.on_start(None).is_empty());
    }

    #[test]
    fn test_whole_block_one_token_is_balanced() {
        let events = run(&["```sh\nls\n```\n"]);
        assert_eq!(count(&events, EventKind::CodeStart), 1);
        assert_eq!(count(&events, EventKind::CodeEnd), 1);
        let start = events.iter().find(|e| e.kind == EventKind::CodeStart).unwrap();
        assert!(start.get_str("token").is_none());
        assert_eq!(start.id, "req-code_start-1");
        assert_eq!(start.get_str("language"), Some("sh"));

        let end = events.iter().find(|e| e.kind == EventKind::CodeEnd).unwrap();
        assert_eq!(end.get_str("language"), Some("sh"));

        let metadata = events.iter().find(|e| e.kind == EventKind::Metadata).unwrap();
        assert_eq!(metadata.get_u64("code_blocks"), Some(1));
        assert_eq!(metadata.data["languages"], serde_json::json!(["sh"]));
    }

    #[test]
    fn test_metadata_counts() {
        let events = run(&["Intro\n", "```js\n", "let a;\n", "```\n", "bye"]);
        let metadata = events.iter().find(|e| e.kind == EventKind::Metadata).unwrap();
        assert_eq!(metadata.get_u64("total_tokens"), Some(5));
        assert_eq!(metadata.get_u64("code_blocks"), Some(1));
        assert_eq!(metadata.get_u64("code_tokens"), Some(1));
        assert_eq!(metadata.get_u64("text_tokens"), Some(2));
        assert_eq!(metadata.data["languages"], serde_json::json!(["js"]));
    }

    #[test]
    fn test_every_event_has_request_id_and_timestamp() {
        let events = run(&["a", "b"]);
        for event in &events {
            assert_eq!(event.get_str("request_id"), Some("req"));
            assert!(event.get_u64("timestamp").is_some());
        }
    }
}
