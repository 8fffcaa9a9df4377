//! Title Extractor
//!
//! Models are prompted to wrap a short title in `<TITLE>...</TITLE>`. The
//! extractor pulls the first non-empty title out of the accumulated text
//! (at most once per session) and strips the markers from what the client
//! sees.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::session::RequestSession;

pub const TITLE_OPEN: &str = "<TITLE>";
pub const TITLE_CLOSE: &str = "</TITLE>";

/// Titles longer than this are cut at a char boundary
const MAX_TITLE_CHARS: usize = 120;

static TITLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<TITLE>(.*?)</TITLE>").expect("title pattern is valid"));

/// First non-empty title in `text`, whitespace-collapsed
pub fn find_title(text: &str) -> Option<String> {
    TITLE_PATTERN.captures_iter(text).find_map(|caps| {
        let title = caps
            .get(1)?
            .as_str()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if title.is_empty() {
            None
        } else {
            Some(title.chars().take(MAX_TITLE_CHARS).collect())
        }
    })
}

/// Remove every marker span (markers and body) from a complete text.
/// An unclosed span runs to the end.
pub fn strip_all_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in marker_spans(text, 0) {
        out.push_str(&text[cursor..start]);
        cursor = end;
    }
    if cursor < text.len() {
        out.push_str(&text[cursor..]);
    }
    out
}

/// Largest char boundary at or before `text.len() - keep`, so the last
/// `keep` bytes (a possible partial marker) stay in view
fn tail_start(text: &str, keep: usize) -> usize {
    let mut start = text.len().saturating_sub(keep);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    start
}

/// Byte ranges of `<TITLE>...</TITLE>` spans starting at or after `from`
fn marker_spans(text: &str, from: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut search = from;
    while let Some(rel) = text[search..].find(TITLE_OPEN) {
        let start = search + rel;
        let body = start + TITLE_OPEN.len();
        let end = match text[body..].find(TITLE_CLOSE) {
            Some(close) => body + close + TITLE_CLOSE.len(),
            None => text.len(),
        };
        spans.push((start, end));
        if end == text.len() {
            break;
        }
        search = end;
    }
    spans
}

/// Per-session title extraction and marker stripping
#[derive(Debug)]
pub struct TitleExtractor {
    interval: usize,
    /// Spans ending before this offset can no longer touch an incoming token
    settled: usize,
}

impl TitleExtractor {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            settled: 0,
        }
    }

    /// Whether an extraction attempt is due after `token` was recorded.
    ///
    /// Attempts run on the cadence, and early when `token` completed a
    /// closing marker.
    pub fn is_due(&self, session: &RequestSession, token: &str) -> bool {
        if session.title_extracted {
            return false;
        }
        if session.token_count % self.interval == 0 {
            return true;
        }
        if !token.contains('>') {
            return false;
        }
        let text = &session.accumulated_text;
        let token_start = text.len().saturating_sub(token.len());
        let from = tail_start(&text[..token_start], TITLE_CLOSE.len() - 1);
        text[from..].contains(TITLE_CLOSE)
    }

    /// Extract the title once. Later calls return `None`.
    pub fn try_extract(&self, session: &mut RequestSession) -> Option<String> {
        if session.title_extracted {
            return None;
        }
        let title = find_title(&session.accumulated_text)?;
        session.title_extracted = true;
        session.title = Some(title.clone());
        Some(title)
    }

    /// Client-visible form of the token occupying `text[token_start..]`.
    ///
    /// Only the current token is edited. Marker text already delivered in
    /// earlier tokens (an opening marker split before it was recognisable)
    /// is not recalled.
    pub fn strip_markers(&mut self, text: &str, token_start: usize) -> String {
        let token = &text[token_start..];
        if !text[self.settled..].contains(TITLE_OPEN) {
            // Only a marker still being typed can matter from here on
            self.settled = self.settled.max(tail_start(text, TITLE_OPEN.len() - 1));
            return token.to_string();
        }

        let mut visible = String::with_capacity(token.len());
        let mut cursor = token_start;
        for (start, end) in marker_spans(text, self.settled) {
            if end <= token_start && end < text.len() {
                // Closed and fully delivered already
                self.settled = end;
                continue;
            }
            let cut = start.max(token_start);
            if cut > cursor {
                visible.push_str(&text[cursor..cut]);
            }
            cursor = cursor.max(end);
        }
        if cursor < text.len() {
            visible.push_str(&text[cursor..]);
        }
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(text: &str) -> RequestSession {
        let mut session = RequestSession::new("r", "m", 200);
        session.record_token(text);
        session
    }

    #[test]
    fn test_find_title() {
        assert_eq!(
            find_title("<TITLE>Quarterly Report</TITLE> body"),
            Some("Quarterly Report".to_string())
        );
        assert_eq!(find_title("<TITLE>  \n </TITLE>"), None);
        assert_eq!(find_title("<TITLE>unclosed"), None);
        assert_eq!(
            find_title("<TITLE></TITLE><TITLE>Second\nline</TITLE>"),
            Some("Second line".to_string())
        );
    }

    #[test]
    fn test_try_extract_only_once() {
        let extractor = TitleExtractor::new(20);
        let mut session = session_with("<TITLE>First</TITLE>");
        assert_eq!(extractor.try_extract(&mut session), Some("First".into()));
        assert!(session.title_extracted);

        session.record_token("<TITLE>Second</TITLE>");
        assert_eq!(extractor.try_extract(&mut session), None);
        assert_eq!(session.title.as_deref(), Some("First"));
    }

    #[test]
    fn test_is_due_on_cadence_or_close_marker() {
        let extractor = TitleExtractor::new(3);
        let mut session = RequestSession::new("r", "m", 200);
        session.record_token("a");
        assert!(!extractor.is_due(&session, "a"));
        session.record_token("</TITLE>");
        assert!(extractor.is_due(&session, "</TITLE>"));
        session.record_token("b");
        assert!(extractor.is_due(&session, "b"));

        session.title_extracted = true;
        assert!(!extractor.is_due(&session, "b"));
    }

    #[test]
    fn test_strip_single_token_title() {
        let mut extractor = TitleExtractor::new(20);
        let text = "<TITLE>Quarterly Report</TITLE>Hello";
        assert_eq!(extractor.strip_markers(text, 0), "Hello");
    }

    #[test]
    fn test_strip_title_across_tokens() {
        let mut extractor = TitleExtractor::new(20);
        let tokens = ["Intro ", "<TITLE>", "My ", "Title", "</TITLE>", " rest"];
        let mut text = String::new();
        let mut visible = String::new();
        for token in tokens {
            let start = text.len();
            text.push_str(token);
            visible.push_str(&extractor.strip_markers(&text, start));
        }
        assert_eq!(visible, "Intro  rest");
    }

    #[test]
    fn test_strip_close_marker_split_across_tokens() {
        let mut extractor = TitleExtractor::new(20);
        let tokens = ["<TITLE>Name</TI", "TLE>after"];
        let mut text = String::new();
        let mut visible = Vec::new();
        for token in tokens {
            let start = text.len();
            text.push_str(token);
            visible.push(extractor.strip_markers(&text, start));
        }
        assert_eq!(visible, vec!["", "after"]);
    }

    #[test]
    fn test_empty_token_inside_open_title() {
        let mut extractor = TitleExtractor::new(20);
        let tokens = ["<TITLE>Hi", "", " there</TITLE>", "after"];
        let mut text = String::new();
        let mut visible = String::new();
        for token in tokens {
            let start = text.len();
            text.push_str(token);
            visible.push_str(&extractor.strip_markers(&text, start));
        }
        assert_eq!(visible, "after");
    }

    #[test]
    fn test_empty_token_after_closed_title() {
        let mut extractor = TitleExtractor::new(20);
        let tokens = ["<TITLE>Hi</TITLE>", "", "body"];
        let mut text = String::new();
        let mut visible = String::new();
        for token in tokens {
            let start = text.len();
            text.push_str(token);
            visible.push_str(&extractor.strip_markers(&text, start));
        }
        assert_eq!(visible, "body");
    }

    #[test]
    fn test_settled_advances_without_markers() {
        let mut extractor = TitleExtractor::new(20);
        let mut text = String::new();
        for token in ["plain ", "text ", "héllo ", "<TIT"] {
            let start = text.len();
            text.push_str(token);
            assert_eq!(extractor.strip_markers(&text, start), token);
        }
        assert!(extractor.settled >= text.len() - (TITLE_OPEN.len() - 1));

        let start = text.len();
        text.push_str("LE>Name</TITLE>rest");
        assert_eq!(extractor.strip_markers(&text, start), "rest");
    }

    #[test]
    fn test_is_due_ignores_unrelated_angle_brackets() {
        let extractor = TitleExtractor::new(20);
        let mut session = RequestSession::new("r", "m", 200);
        session.record_token("<b>bold</b>");
        assert!(!extractor.is_due(&session, "<b>bold</b>"));
        session.record_token("fn f() -> u8");
        assert!(!extractor.is_due(&session, "fn f() -> u8"));

        session.record_token("<TITLE>T</TI");
        session.record_token("TLE>");
        assert!(extractor.is_due(&session, "TLE>"));
    }

    #[test]
    fn test_strip_without_markers_is_identity() {
        let mut extractor = TitleExtractor::new(20);
        assert_eq!(extractor.strip_markers("plain <b>html</b>", 6), "<b>html</b>");
    }

    #[test]
    fn test_strip_all_markers() {
        assert_eq!(
            strip_all_markers("<TITLE>T</TITLE>Body text<TITLE>dangling"),
            "Body text"
        );
        assert_eq!(strip_all_markers("no markers"), "no markers");
    }
}
