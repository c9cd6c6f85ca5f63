//! Core traits and errors shared by the producer and consumer sides.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Batch, Snapshot};

/// Failure reported by the component that discovers records.
///
/// Never retried here; it is forwarded to the consumer and the records
/// collected so far are still published.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Could not load history: {message}")]
pub struct ProducerError {
    /// Human-readable cause.
    pub message: String,
}

impl ProducerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Publishing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("Consumer task has stopped")]
    ConsumerClosed,
}

/// Receiver of published session state.
///
/// All methods run on a single consumer task, one at a time and in
/// submission order, so implementations never see concurrent calls.
///
/// The producer side may be waiting for a consumer call to return, so
/// implementations must not call back into the producer-facing API.
#[async_trait]
pub trait SessionConsumer<R>: Send + 'static {
    /// A new, larger (or trimmed) view of the session. Called repeatedly
    /// with growing content.
    async fn on_snapshot(&mut self, snapshot: Snapshot<R>);

    /// No more growth will happen this refresh cycle.
    async fn on_finalized(&mut self);

    /// The producer failed mid-cycle.
    async fn on_failure(&mut self, error: ProducerError);
}

/// Downstream of a [`Batcher`](crate::Batcher).
///
/// Invoked with exclusive access: two batches are never handled at once.
#[async_trait]
pub trait BatchHandler<R>: Send + 'static {
    async fn handle_batch(&mut self, batch: Batch<R>);
}
