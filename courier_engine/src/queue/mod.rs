//! The message-queue contract consumed by the idempotent consumer loop, and a durable SQLite-backed
//! implementation of it.
//!
//! Delivery semantics are at-least-once: a received message is hidden from other consumers for the
//! visibility timeout and becomes eligible for redelivery when the timeout expires without a delete.
//! Exactly-once is explicitly not attempted; the consumer layers idempotent application on top.
use std::{future::Future, time::Duration};

use chrono::Utc;
use log::trace;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::sqlite::db::queue;

/// How often the long-poll loop re-checks the backing store while waiting for messages.
const LONG_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A message as handed to a consumer. The receipt is what `delete` needs to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub receipt: i64,
    pub body: String,
}

/// Receive/delete/send over a durable message queue.
///
/// Declared in the desugared `impl Future + Send` form so the consumer loop built on top of it can be
/// spawned; implementations can still use `async fn`.
pub trait EventQueue: Clone + Send + Sync {
    /// Long-polls for up to `wait`, returning at most `max_messages` messages. Returned messages are
    /// invisible to other receivers for `visibility_timeout`; they must be deleted within that window
    /// or they will be redelivered.
    fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> impl Future<Output = Result<Vec<QueueMessage>, QueueError>> + Send;

    /// Acknowledges (permanently removes) a received message.
    fn delete(&self, receipt: i64) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Publishes a message body onto the queue.
    fn send(&self, body: &str) -> impl Future<Output = Result<(), QueueError>> + Send;
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    StorageError(#[from] sqlx::Error),
}

/// A durable queue stored in the service's own SQLite database. Each `topic` is an independent
/// logical queue over the same table; the inbound order/payment stream and the outbound
/// notification stream use different topics so neither consumer sees the other's messages.
#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
    topic: String,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool, topic: &str) -> Self {
        Self { pool, topic: topic.to_string() }
    }

    pub fn topic(&self) -> &str {
        self.topic.as_str()
    }

    /// Total number of messages currently in the queue, visible or hidden.
    pub async fn len(&self) -> Result<i64, QueueError> {
        let mut conn = self.pool.acquire().await?;
        let count = queue::message_count(&self.topic, &mut conn).await?;
        Ok(count)
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}

impl EventQueue for SqliteQueue {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let now = Utc::now();
            let visible_until = now
                + chrono::Duration::from_std(visibility_timeout).unwrap_or_else(|_| chrono::Duration::seconds(30));
            let mut conn = self.pool.acquire().await?;
            let rows = queue::claim_messages(&self.topic, max_messages as i64, now, visible_until, &mut conn).await?;
            drop(conn);
            if !rows.is_empty() {
                trace!("📬️ Received {} messages from the queue", rows.len());
                return Ok(rows.into_iter().map(|(receipt, body)| QueueMessage { receipt, body }).collect());
            }
            if tokio::time::Instant::now() + LONG_POLL_INTERVAL >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(LONG_POLL_INTERVAL).await;
        }
    }

    async fn delete(&self, receipt: i64) -> Result<(), QueueError> {
        let mut conn = self.pool.acquire().await?;
        let deleted = queue::delete_message(receipt, &mut conn).await?;
        if !deleted {
            // Another consumer may already have acknowledged it after a visibility-timeout redelivery.
            trace!("📬️ Receipt {receipt} did not match any message");
        }
        Ok(())
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        let mut conn = self.pool.acquire().await?;
        let id = queue::enqueue(&self.topic, body, Utc::now(), &mut conn).await?;
        trace!("📬️ Message {id} enqueued on '{}'", self.topic);
        Ok(())
    }
}
