//! Cancellation support for stream producers
//!
//! One token per session, shared by the consumer (which cancels) and the
//! producer task (which watches).

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cancellation handle for one producer task
#[derive(Clone, Debug)]
pub struct ProducerCancellation {
    token: CancellationToken,
}

impl ProducerCancellation {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Request cancellation. Safe to call any number of times.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves once cancellation has been requested
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

impl Default for ProducerCancellation {
    fn default() -> Self {
        Self::new()
    }
}
