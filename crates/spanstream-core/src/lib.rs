//! Spanstream Core
//!
//! Streaming token classification and delivery for model output:
//! - `classify`: per-token content tracking (text / Markdown / code fences)
//! - `title`: `<TITLE>` marker extraction and stripping
//! - `emitter`: provider callbacks to ordered, typed events
//! - `delivery`: producer task, bounded channel, idle-timeout consumer
//! - `admission`: concurrency limits and the backend circuit breaker
//! - `service`: the request entry point tying it all together

pub mod admission;
pub mod binding;
pub mod classify;
pub mod config;
pub mod delivery;
pub mod emitter;
pub mod error;
pub mod events;
pub mod provider;
pub mod service;
pub mod session;
pub mod title;

pub use admission::{AdmissionGate, BreakerState, CircuitBreaker, Lane};
pub use binding::{BindingCache, ModelBinding};
pub use classify::{ContentKind, ContentState, TokenClass};
pub use config::StreamConfig;
pub use delivery::{DeliveryStream, ProducerCancellation, SessionReport};
pub use emitter::EventEmitter;
pub use error::StreamError;
pub use events::{EventKind, StreamEvent};
pub use provider::{
    ChunkMode, CompletionRequest, ModelOptions, ModelProvider, ProviderSignal, ScriptedProvider,
    SignalStream,
};
pub use service::{Completion, HealthReport, StreamService};
pub use session::{RequestSession, SessionPhase};
