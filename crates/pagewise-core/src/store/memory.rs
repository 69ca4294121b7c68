//! In-memory [`RecordStore`] implementation for tests and embedding.
//!
//! Each record family lives in its own `HashMap` behind a
//! `std::sync::RwLock`.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{CacheEntry, TaskStatus, Turn, UrlTaskMapping};

use super::{RecordStore, StatusCounts};

/// In-memory record store.
#[derive(Default)]
pub struct InMemoryRecordStore {
    statuses: RwLock<HashMap<String, TaskStatus>>,
    url_tasks: RwLock<BTreeMap<String, UrlTaskMapping>>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    conversations: RwLock<HashMap<String, Vec<Turn>>>,
    flags: RwLock<HashMap<String, String>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("record store lock poisoned")
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_status(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        Ok(self.statuses.read().map_err(|_| poisoned())?.get(task_id).copied())
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.statuses
            .write()
            .map_err(|_| poisoned())?
            .insert(task_id.to_string(), status);
        Ok(())
    }

    async fn get_url_mapping(&self, url: &str) -> Result<Option<UrlTaskMapping>> {
        Ok(self.url_tasks.read().map_err(|_| poisoned())?.get(url).cloned())
    }

    async fn set_url_mapping(&self, url: &str, mapping: &UrlTaskMapping) -> Result<()> {
        self.url_tasks
            .write()
            .map_err(|_| poisoned())?
            .insert(url.to_string(), mapping.clone());
        Ok(())
    }

    async fn get_cache(&self, url: &str) -> Result<Option<CacheEntry>> {
        Ok(self.cache.read().map_err(|_| poisoned())?.get(url).cloned())
    }

    async fn set_cache(&self, url: &str, entry: &CacheEntry) -> Result<()> {
        self.cache
            .write()
            .map_err(|_| poisoned())?
            .insert(url.to_string(), entry.clone());
        Ok(())
    }

    async fn get_conversation(&self, task_id: &str) -> Result<Option<Vec<Turn>>> {
        Ok(self
            .conversations
            .read()
            .map_err(|_| poisoned())?
            .get(task_id)
            .cloned())
    }

    async fn set_conversation(&self, task_id: &str, turns: &[Turn]) -> Result<()> {
        self.conversations
            .write()
            .map_err(|_| poisoned())?
            .insert(task_id.to_string(), turns.to_vec());
        Ok(())
    }

    async fn list_url_mappings(&self) -> Result<Vec<(String, UrlTaskMapping)>> {
        Ok(self
            .url_tasks
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .map(|(url, m)| (url.clone(), m.clone()))
            .collect())
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let statuses = self.statuses.read().map_err(|_| poisoned())?;
        let mut counts = StatusCounts::default();
        for status in statuses.values() {
            counts.record(*status);
        }
        Ok(counts)
    }

    async fn get_flag(&self, name: &str) -> Result<Option<String>> {
        Ok(self.flags.read().map_err(|_| poisoned())?.get(name).cloned())
    }

    async fn set_flag(&self, name: &str, value: &str) -> Result<()> {
        self.flags
            .write()
            .map_err(|_| poisoned())?
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}
