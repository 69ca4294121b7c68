//! Task status updates with a best-effort URL mirror.
//!
//! A status change is two writes: the authoritative `task_status` record,
//! then the `url_tasks` mirror for the task's URL. They are not atomic. If
//! the process dies between them, the mirror lags the authoritative status
//! until the next transition for that task; readers that need the truth
//! must use [`RecordStore::get_status`].

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use pagewise_core::models::{TaskStatus, UrlTaskMapping};
use pagewise_core::store::RecordStore;

/// What happened to the URL mirror during a status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    Applied,
    /// No mapping exists for the URL; mappings are never created here.
    NoMapping,
    /// The caller did not know the task's URL.
    NoUrl,
    /// The URL's mapping points at a different task and was left alone.
    OtherTask(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub previous: Option<TaskStatus>,
    pub status: TaskStatus,
    pub mirror: MirrorOutcome,
}

pub struct StatusTracker {
    store: Arc<dyn RecordStore>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Move `task_id` to `next` and mirror it onto `url`'s mapping.
    ///
    /// A task with no status record is treated as `pending`.
    ///
    /// # Errors
    ///
    /// Fails with [`StatusError::InvalidTransition`](pagewise_core::models::StatusError)
    /// when the move is not forward, or when the authoritative write fails.
    /// Mirror failures are reported in the returned [`StatusUpdate`].
    pub async fn transition(
        &self,
        task_id: &str,
        url: Option<&str>,
        next: TaskStatus,
    ) -> Result<StatusUpdate> {
        let previous = self.store.get_status(task_id).await?;
        previous.unwrap_or(TaskStatus::Pending).transition_to(next)?;

        self.store.set_status(task_id, next).await?;

        let mirror = match url {
            Some(url) => self.mirror(task_id, url, next).await,
            None => MirrorOutcome::NoUrl,
        };
        debug!(task_id, status = %next, mirror = ?mirror, "status updated");

        Ok(StatusUpdate {
            previous,
            status: next,
            mirror,
        })
    }

    async fn mirror(&self, task_id: &str, url: &str, status: TaskStatus) -> MirrorOutcome {
        match self.store.get_url_mapping(url).await {
            Ok(Some(existing)) if existing.task_id != task_id => {
                debug!(task_id, url, owner = %existing.task_id, "url mapped to another task, not mirrored");
                return MirrorOutcome::OtherTask(existing.task_id);
            }
            Ok(Some(_)) => {}
            Ok(None) => return MirrorOutcome::NoMapping,
            Err(e) => {
                warn!(task_id, url, error = %e, "could not read url mapping");
                return MirrorOutcome::Failed(format!("{:#}", e));
            }
        }

        let mapping = UrlTaskMapping {
            task_id: task_id.to_string(),
            status,
        };
        match self.store.set_url_mapping(url, &mapping).await {
            Ok(()) => MirrorOutcome::Applied,
            Err(e) => {
                warn!(task_id, url, error = %e, "could not mirror status onto url mapping");
                MirrorOutcome::Failed(format!("{:#}", e))
            }
        }
    }
}
