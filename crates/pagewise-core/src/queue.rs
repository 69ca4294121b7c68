//! Task queue abstraction.
//!
//! A single-consumer FIFO of [`TaskPayload`]s with a blocking,
//! timeout-bounded pop, plus fire-and-forget notification publishing.
//! Delivery is at-least-attempted: a payload popped by a consumer that then
//! crashes is not redelivered.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::TaskPayload;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append a payload to the tail of the queue.
    async fn push(&self, payload: &TaskPayload) -> Result<()>;

    /// Pop the head of the queue, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `Ok(None)` when the timeout elapses with the queue empty.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<TaskPayload>>;

    /// Number of payloads waiting.
    async fn len(&self) -> Result<usize>;

    /// Publish `message` on `channel` for any interested subscriber.
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;
}
