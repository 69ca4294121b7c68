//! [`TaskQueue`] implementations.
//!
//! - [`MemoryTaskQueue`]: `VecDeque` + `tokio::sync::Notify`, for tests and
//!   single-process runs.
//! - [`SqliteTaskQueue`]: FIFO table in the shared database; payloads
//!   survive restarts. Pops are a single `DELETE ... RETURNING` statement so
//!   a payload is handed to at most one consumer.
//!
//! Both fan published notifications out to in-process subscribers through a
//! [`NotificationHub`]. Notifications are not stored: a subscriber sees only
//! what is published while it is subscribed, and a subscriber that falls
//! more than the buffer behind loses the oldest ones. Publishing never fails
//! because nobody is listening.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

use pagewise_core::models::TaskPayload;
use pagewise_core::queue::TaskQueue;

const NOTIFICATION_BUFFER: usize = 256;

/// Interval between polls of the queue table while waiting for work.
const SQLITE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A message published on a notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Broadcast of published notifications to in-process subscribers.
///
/// Clones share one channel.
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
}

impl NotificationHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn send(&self, channel: &str, payload: &str) {
        // Err only means nobody is subscribed.
        let _ = self.sender.send(Notification {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process queue.
pub struct MemoryTaskQueue {
    items: Mutex<VecDeque<TaskPayload>>,
    arrived: Notify,
    hub: NotificationHub,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
            hub: NotificationHub::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.hub.subscribe()
    }

    /// Handle on this queue's notifications.
    pub fn hub(&self) -> NotificationHub {
        self.hub.clone()
    }

    fn pop(&self) -> Result<Option<TaskPayload>> {
        Ok(self
            .items
            .lock()
            .map_err(|_| anyhow!("queue lock poisoned"))?
            .pop_front())
    }
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn push(&self, payload: &TaskPayload) -> Result<()> {
        self.items
            .lock()
            .map_err(|_| anyhow!("queue lock poisoned"))?
            .push_back(payload.clone());
        self.arrived.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<TaskPayload>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.pop()? {
                return Ok(Some(payload));
            }
            if tokio::time::timeout_at(deadline, self.arrived.notified())
                .await
                .is_err()
            {
                return self.pop();
            }
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self
            .items
            .lock()
            .map_err(|_| anyhow!("queue lock poisoned"))?
            .len())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.hub.send(channel, message);
        Ok(())
    }
}

/// Queue stored in the `task_queue` table, partitioned by queue name.
#[derive(Clone)]
pub struct SqliteTaskQueue {
    pool: SqlitePool,
    name: String,
    hub: NotificationHub,
}

impl SqliteTaskQueue {
    pub fn new(pool: SqlitePool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
            hub: NotificationHub::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.hub.subscribe()
    }

    /// Handle on this queue's notifications.
    pub fn hub(&self) -> NotificationHub {
        self.hub.clone()
    }

    async fn pop(&self) -> Result<Option<TaskPayload>> {
        let raw: Option<String> = sqlx::query_scalar(
            r#"
            DELETE FROM task_queue
            WHERE id = (SELECT id FROM task_queue WHERE queue = ? ORDER BY id LIMIT 1)
            RETURNING payload
            "#,
        )
        .bind(&self.name)
        .fetch_optional(&self.pool)
        .await?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("malformed task payload on {}: {}", self.name, json))
        })
        .transpose()
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn push(&self, payload: &TaskPayload) -> Result<()> {
        sqlx::query("INSERT INTO task_queue (queue, payload, enqueued_at) VALUES (?, ?, ?)")
            .bind(&self.name)
            .bind(serde_json::to_string(payload)?)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<TaskPayload>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.pop().await? {
                return Ok(Some(payload));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(SQLITE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn len(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_queue WHERE queue = ?")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    /// Broadcast only; nothing is written to the database.
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.hub.send(channel, message);
        Ok(())
    }
}
