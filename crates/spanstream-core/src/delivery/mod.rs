//! Delivery pipeline
//!
//! Each streaming session is a producer task feeding a bounded channel and
//! a consumer that reads it under an idle timeout. The consumer owns
//! shutdown: whatever ends the session, the producer is cancelled and
//! awaited before the stream reports its outcome.

mod cancellation;
mod consumer;
mod producer;

pub use cancellation::ProducerCancellation;
pub use consumer::DeliveryStream;
pub use producer::SessionReport;

pub(crate) use producer::Producer;
