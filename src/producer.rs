//! Producer side of the task queue.

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use pagewise_core::models::{TaskPayload, TaskStatus, UrlTaskMapping};
use pagewise_core::queue::TaskQueue;
use pagewise_core::store::RecordStore;

/// Result of [`enqueue_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub task_id: String,
    pub status: TaskStatus,
    /// `false` when the URL already had a task and nothing was queued.
    pub created: bool,
}

/// Queue `url` for processing unless it already has a task.
///
/// A new task gets a UUID v4 id, a `pending` status record and a URL
/// mapping, in that order, before its payload is pushed.
pub async fn enqueue_url(
    store: &dyn RecordStore,
    queue: &dyn TaskQueue,
    url: &str,
) -> Result<Enqueued> {
    if let Some(existing) = store.get_url_mapping(url).await? {
        return Ok(Enqueued {
            task_id: existing.task_id,
            status: existing.status,
            created: false,
        });
    }

    let task_id = Uuid::new_v4().to_string();
    store.set_status(&task_id, TaskStatus::Pending).await?;
    store
        .set_url_mapping(
            url,
            &UrlTaskMapping {
                task_id: task_id.clone(),
                status: TaskStatus::Pending,
            },
        )
        .await?;
    queue
        .push(&TaskPayload {
            url: url.to_string(),
            task_id: task_id.clone(),
        })
        .await
        .with_context(|| format!("Failed to enqueue {}", url))?;

    info!(task_id = %task_id, url, "task enqueued");
    Ok(Enqueued {
        task_id,
        status: TaskStatus::Pending,
        created: true,
    })
}
