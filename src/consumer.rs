//! Task consumer: the single loop that turns queued URLs into results.
//!
//! For each dequeued `{url, uuid}`:
//!
//! 1. status → `processing` (mirrored onto the URL mapping if one exists)
//! 2. scrape the URL
//! 3. ingest, summarize, classify sentiment
//! 4. write the cache entry, status → `done`, publish a [`ProcessResult`]
//!
//! Any error in steps 2–4 moves the task to `failed` and the loop sleeps for
//! the configured backoff before dequeuing again. Failed tasks are not
//! re-enqueued. Tasks are processed strictly one at a time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use pagewise_core::models::{CacheEntry, ProcessResult, TaskPayload, TaskStatus};
use pagewise_core::queue::TaskQueue;
use pagewise_core::store::RecordStore;

use crate::article::ArticleProcessor;
use crate::config::QueueConfig;
use crate::scrape::Scraper;
use crate::status::StatusTracker;

/// How one dequeued payload ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Done { task_id: String, url: String },
    Failed { task_id: String, url: String, reason: String },
    /// The task could not be moved to `processing` and was left untouched.
    Skipped { task_id: String, reason: String },
}

pub struct TaskConsumer {
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn RecordStore>,
    scraper: Arc<dyn Scraper>,
    processor: Arc<ArticleProcessor>,
    status: StatusTracker,
    results_channel: String,
    dequeue_timeout: Duration,
    failure_backoff: Duration,
}

impl TaskConsumer {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn RecordStore>,
        scraper: Arc<dyn Scraper>,
        processor: Arc<ArticleProcessor>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            queue,
            status: StatusTracker::new(store.clone()),
            store,
            scraper,
            processor,
            results_channel: config.results_channel.clone(),
            dequeue_timeout: config.dequeue_timeout(),
            failure_backoff: config.failure_backoff(),
        }
    }

    /// Run until `shutdown` turns `true`.
    ///
    /// Shutdown is observed between tasks; a task in flight always runs to
    /// completion or failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(channel = %self.results_channel, "consumer started");
        while !*shutdown.borrow() {
            let backoff = match self.poll_once().await {
                Ok(Some(TaskOutcome::Failed { .. })) => true,
                Ok(_) => false,
                Err(e) => {
                    error!(error = %format!("{:#}", e), "dequeue failed");
                    true
                }
            };

            if backoff {
                tokio::select! {
                    _ = tokio::time::sleep(self.failure_backoff) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        info!("consumer stopped");
        Ok(())
    }

    /// Wait up to the dequeue timeout for one payload and handle it.
    ///
    /// Returns `Ok(None)` when nothing arrived.
    pub async fn poll_once(&self) -> Result<Option<TaskOutcome>> {
        match self.queue.dequeue(self.dequeue_timeout).await? {
            Some(payload) => Ok(Some(self.handle(payload).await)),
            None => Ok(None),
        }
    }

    pub async fn handle(&self, payload: TaskPayload) -> TaskOutcome {
        let TaskPayload { url, task_id } = payload;
        info!(task_id = %task_id, url = %url, "processing task");

        if let Err(e) = self
            .status
            .transition(&task_id, Some(&url), TaskStatus::Processing)
            .await
        {
            warn!(task_id = %task_id, error = %format!("{:#}", e), "cannot start task, skipping");
            return TaskOutcome::Skipped {
                task_id,
                reason: format!("{:#}", e),
            };
        }

        match self.execute(&task_id, &url).await {
            Ok(()) => {
                info!(task_id = %task_id, "task done");
                TaskOutcome::Done { task_id, url }
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(task_id = %task_id, url = %url, error = %reason, "task failed");
                if let Err(mark) = self
                    .status
                    .transition(&task_id, Some(&url), TaskStatus::Failed)
                    .await
                {
                    error!(task_id = %task_id, error = %format!("{:#}", mark), "could not mark task failed");
                }
                TaskOutcome::Failed {
                    task_id,
                    url,
                    reason,
                }
            }
        }
    }

    async fn execute(&self, task_id: &str, url: &str) -> Result<()> {
        let text = self
            .scraper
            .scrape(url)
            .await
            .with_context(|| format!("Failed to scrape {}", url))?;
        debug!(task_id, chars = text.len(), "scraped page");

        let digest = self.processor.process(task_id, &text).await?;

        let entry = CacheEntry::new(url, digest.summary, digest.sentiment);
        let message = serde_json::to_string(&ProcessResult {
            task_id: task_id.to_string(),
            url: url.to_string(),
            result: entry.clone(),
        })?;

        self.store
            .set_cache(url, &entry)
            .await
            .context("Failed to write cache entry")?;
        self.status
            .transition(task_id, Some(url), TaskStatus::Done)
            .await?;

        // The task is done at this point; a lost notification does not undo it.
        if let Err(e) = self.queue.publish(&self.results_channel, &message).await {
            warn!(task_id, error = %format!("{:#}", e), "failed to publish result");
        }
        Ok(())
    }
}
