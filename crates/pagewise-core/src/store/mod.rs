//! Durable record store abstraction.
//!
//! The [`RecordStore`] trait covers every key/value record the pipeline
//! keeps: authoritative task status, the URL → task status mirror, the
//! per-URL result cache, per-task chat transcripts, and process flags.
//!
//! Operations are independent get-or-set calls. No transaction spans more
//! than one key, so callers that write two records (task status plus its URL
//! mirror) must tolerate a crash between the writes.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{CacheEntry, TaskStatus, Turn, UrlTaskMapping};

/// Flag written once the model service reports its models loaded.
pub const MODELS_READY_FLAG: &str = "models:ready";

/// Number of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Processing => self.processing += 1,
            TaskStatus::Done => self.done += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }
}

/// Abstract key/value backend for task records.
///
/// | Method | Key |
/// |--------|-----|
/// | [`get_status`](RecordStore::get_status) / [`set_status`](RecordStore::set_status) | task id |
/// | [`get_url_mapping`](RecordStore::get_url_mapping) / [`set_url_mapping`](RecordStore::set_url_mapping) | url |
/// | [`get_cache`](RecordStore::get_cache) / [`set_cache`](RecordStore::set_cache) | url |
/// | [`get_conversation`](RecordStore::get_conversation) / [`set_conversation`](RecordStore::set_conversation) | task id |
/// | [`get_flag`](RecordStore::get_flag) / [`set_flag`](RecordStore::set_flag) | flag name |
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_status(&self, task_id: &str) -> Result<Option<TaskStatus>>;

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    async fn get_url_mapping(&self, url: &str) -> Result<Option<UrlTaskMapping>>;

    async fn set_url_mapping(&self, url: &str, mapping: &UrlTaskMapping) -> Result<()>;

    async fn get_cache(&self, url: &str) -> Result<Option<CacheEntry>>;

    /// Write the cache entry for `url`, replacing any previous entry.
    async fn set_cache(&self, url: &str, entry: &CacheEntry) -> Result<()>;

    /// Persisted non-system turns for a task, in original order.
    async fn get_conversation(&self, task_id: &str) -> Result<Option<Vec<Turn>>>;

    async fn set_conversation(&self, task_id: &str, turns: &[Turn]) -> Result<()>;

    /// All URL mappings as `(url, mapping)` pairs, ordered by url.
    async fn list_url_mappings(&self) -> Result<Vec<(String, UrlTaskMapping)>>;

    /// Count tasks by authoritative status.
    async fn status_counts(&self) -> Result<StatusCounts>;

    async fn get_flag(&self, name: &str) -> Result<Option<String>>;

    async fn set_flag(&self, name: &str, value: &str) -> Result<()>;

    /// Reverse lookup of the URL whose mapping points at `task_id`.
    async fn find_url_for_task(&self, task_id: &str) -> Result<Option<String>> {
        Ok(self
            .list_url_mappings()
            .await?
            .into_iter()
            .find(|(_, m)| m.task_id == task_id)
            .map(|(url, _)| url))
    }
}
