//! Streaming content classification
//!
//! Splits a token stream into plain text, Markdown and fenced code spans
//! without ever looking ahead.

pub mod patterns;
mod tracker;

pub use tracker::{
    Classification, ContentKind, ContentState, TokenClass, Transition, DEFAULT_ROLLING_WINDOW,
};
