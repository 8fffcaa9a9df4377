//! Content State Tracker
//!
//! Single-pass, token-at-a-time classifier for streamed model text. Each
//! token is classified as plain text, Markdown-flavoured prose, code, or a
//! fence transition, using only a bounded window of trailing context.
//!
//! This is a heuristic, not a Markdown parser:
//! - Fences do not nest; a block closes on the first bare fence line after
//!   at least one content line.
//! - Markdown detection is "sticky": once a cue is seen the span stays
//!   Markdown until a token's trailing window matches no cue at all.
//! - An unknown fence tag renders as a generic fenced block (Markdown),
//!   not as code.

use serde::{Deserialize, Serialize};

use super::patterns::{has_markdown_cue, is_language_tag, FENCE};

/// Default number of trailing characters kept for cue detection
pub const DEFAULT_ROLLING_WINDOW: usize = 200;

/// What kind of span the stream is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Text,
    Markdown,
    Code,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Markdown => "markdown",
            ContentKind::Code => "code",
        }
    }
}

/// Classification of a single token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Token,
    MarkdownToken,
    CodeToken,
    CodeStart,
    CodeEnd,
}

impl TokenClass {
    pub fn is_fence(&self) -> bool {
        matches!(self, TokenClass::CodeStart | TokenClass::CodeEnd)
    }
}

/// A fence transition and the language of the block it opens or closes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub class: TokenClass,
    pub language: Option<String>,
}

/// Result of classifying one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The class carried by the token's own event
    pub class: TokenClass,
    /// Language reported with the token's own event
    pub language: Option<String>,
    /// Fence transitions that happened earlier inside the same token, oldest first.
    /// Only non-empty when one token both opens and closes a block.
    pub preceding: Vec<Transition>,
}

/// Per-session classification state
#[derive(Debug, Clone)]
pub struct ContentState {
    pub kind: ContentKind,
    pub in_code_block: bool,
    /// 0 or 1, fences do not nest
    pub code_fence_depth: u8,
    pub code_language: Option<String>,
    /// Last `window` characters of the stream
    pub rolling_buffer: String,
    /// Characters since the last newline (capped at `window` bytes)
    pub line_buffer: String,
    /// True between fence-open and language resolution
    pub awaiting_language: bool,
    pub markdown_sticky: bool,
    window: usize,
    /// A fence already opened or closed on the current line
    fence_on_line: bool,
    /// Completed content lines since the block opened
    block_lines: usize,
}

impl Default for ContentState {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentState {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_ROLLING_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            kind: ContentKind::Text,
            in_code_block: false,
            code_fence_depth: 0,
            code_language: None,
            rolling_buffer: String::new(),
            line_buffer: String::new(),
            awaiting_language: false,
            markdown_sticky: false,
            window,
            fence_on_line: false,
            block_lines: 0,
        }
    }

    /// Classify the next token, updating state in place
    pub fn classify(&mut self, token: &str) -> Classification {
        let mut transitions = Vec::new();

        let mut pieces = token.split('\n').peekable();
        while let Some(piece) = pieces.next() {
            let ends_line = pieces.peek().is_some();

            self.push_rolling(piece);
            if self.line_buffer.len() < self.window {
                self.line_buffer.push_str(piece);
            }
            self.scan_line(ends_line, &mut transitions);

            if ends_line {
                self.push_rolling("\n");
                self.finish_line();
            }
        }

        let content = if self.in_code_block {
            if self.awaiting_language || self.kind == ContentKind::Code {
                TokenClass::CodeToken
            } else {
                TokenClass::MarkdownToken
            }
        } else {
            self.update_sticky();
            if self.markdown_sticky {
                TokenClass::MarkdownToken
            } else {
                TokenClass::Token
            }
        };

        let (class, language) = match transitions.pop() {
            Some(last) => (last.class, last.language),
            None => (content, self.code_language.clone()),
        };
        Classification {
            class,
            language,
            preceding: transitions,
        }
    }

    /// Close a dangling block at end of stream. Returns true if one was open.
    pub fn force_close(&mut self) -> bool {
        if self.in_code_block {
            self.close_fence();
            true
        } else {
            false
        }
    }

    /// Fence transitions and language resolution for the current line
    fn scan_line(&mut self, line_complete: bool, transitions: &mut Vec<Transition>) {
        if !self.fence_on_line {
            let trimmed = self.line_buffer.trim();
            if !self.in_code_block && trimmed.starts_with(FENCE) {
                self.open_fence();
                transitions.push(Transition {
                    class: TokenClass::CodeStart,
                    language: None,
                });
            } else if self.in_code_block && self.block_lines > 0 && trimmed == FENCE {
                let language = self.code_language.take();
                self.close_fence();
                transitions.push(Transition {
                    class: TokenClass::CodeEnd,
                    language,
                });
            }
        }

        if self.awaiting_language && self.fence_on_line {
            self.try_resolve_language(line_complete);
            if !self.awaiting_language {
                // Resolved inside the token that opened the block
                if let Some(open) = transitions
                    .iter_mut()
                    .rev()
                    .find(|t| t.class == TokenClass::CodeStart)
                {
                    open.language = self.code_language.clone();
                }
            }
        }
    }

    fn finish_line(&mut self) {
        if self.in_code_block && !self.fence_on_line {
            self.block_lines += 1;
        }
        self.fence_on_line = false;
        self.line_buffer.clear();
    }

    fn open_fence(&mut self) {
        self.in_code_block = true;
        self.code_fence_depth = 1;
        self.awaiting_language = true;
        self.code_language = None;
        self.kind = ContentKind::Code;
        self.block_lines = 0;
        self.fence_on_line = true;
    }

    fn close_fence(&mut self) {
        self.in_code_block = false;
        self.code_fence_depth = 0;
        self.awaiting_language = false;
        self.code_language = None;
        self.markdown_sticky = false;
        self.kind = ContentKind::Text;
        self.block_lines = 0;
        self.fence_on_line = true;
        // Code must not drive prose classification after the block
        self.rolling_buffer.clear();
    }

    /// Resolve the fence tag once its first word is complete.
    ///
    /// A bare fence waits for the end of its line and then defaults to code
    /// with no language.
    fn try_resolve_language(&mut self, line_complete: bool) {
        let info = self
            .line_buffer
            .trim_start()
            .strip_prefix(FENCE)
            .unwrap_or("")
            .trim_start();

        if info.is_empty() {
            if line_complete {
                self.resolve_language(None);
            }
            return;
        }

        if !line_complete && !info.contains(char::is_whitespace) {
            return;
        }

        let word = info.split_whitespace().next().map(str::to_lowercase);
        self.resolve_language(word);
    }

    fn resolve_language(&mut self, word: Option<String>) {
        self.awaiting_language = false;
        match word {
            None => {
                self.kind = ContentKind::Code;
                self.code_language = None;
            }
            Some(tag) if is_language_tag(&tag) => {
                self.kind = ContentKind::Code;
                self.code_language = Some(tag);
            }
            Some(_) => {
                self.kind = ContentKind::Markdown;
                self.code_language = None;
            }
        }
    }

    /// Latch or clear Markdown stickiness from the rolling window.
    /// Only called while no fence is open.
    fn update_sticky(&mut self) {
        if has_markdown_cue(&self.rolling_buffer) {
            self.markdown_sticky = true;
        } else if !self.in_code_block {
            self.markdown_sticky = false;
        }
        self.kind = if self.markdown_sticky {
            ContentKind::Markdown
        } else {
            ContentKind::Text
        };
    }

    fn push_rolling(&mut self, text: &str) {
        self.rolling_buffer.push_str(text);
        let len = self.rolling_buffer.chars().count();
        if len > self.window {
            let excess = len - self.window;
            let cut = self
                .rolling_buffer
                .char_indices()
                .nth(excess)
                .map(|(idx, _)| idx)
                .unwrap_or(self.rolling_buffer.len());
            self.rolling_buffer.drain(..cut);
        }
    }
}
