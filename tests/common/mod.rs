//! Shared test doubles for the pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use pagewise::app::{Collaborators, Services};
use pagewise::article::{SENTIMENT_INSTRUCTION, SUMMARY_INSTRUCTION};
use pagewise::config::{parse_config, Config};
use pagewise::queue::MemoryTaskQueue;
use pagewise::readiness::NoopNotifier;
use pagewise::scrape::{ScrapeError, Scraper};
use pagewise_core::embedding::RawEmbedding;
use pagewise_core::index::memory::InMemoryVectorIndex;
use pagewise_core::index::{ChunkBatch, IndexHit, VectorIndex};
use pagewise_core::model::ModelClient;
use pagewise_core::models::{CacheEntry, TaskStatus, Turn, UrlTaskMapping};
use pagewise_core::store::memory::InMemoryRecordStore;
use pagewise_core::store::{RecordStore, StatusCounts};

// ─── Model ──────────────────────────────────────────────────────────

const KEYWORDS: [&str; 4] = ["rust", "python", "cooking", "music"];

/// Embeds text as keyword counts, so similarity follows topic.
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    KEYWORDS
        .iter()
        .map(|k| lower.matches(k).count() as f32 + 0.01)
        .collect()
}

/// Model double with fixed answers that records every chat transcript.
pub struct ScriptedModel {
    pub summary: String,
    pub sentiment: String,
    pub answer: String,
    pub fail_chat: bool,
    pub fail_summary: bool,
    pub chat_calls: Mutex<Vec<Vec<Turn>>>,
    pub sentiment_inputs: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            summary: "A greeting page.".to_string(),
            sentiment: "neutral".to_string(),
            answer: "Sure.".to_string(),
            fail_chat: false,
            fail_summary: false,
            chat_calls: Mutex::new(Vec::new()),
            sentiment_inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn last_chat(&self) -> Vec<Turn> {
        self.chat_calls
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn embed(&self, text: &str) -> Result<RawEmbedding> {
        // Batch-of-one, as Ollama returns it.
        Ok(RawEmbedding::Nested(vec![keyword_vector(text).into()]))
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        if system == SUMMARY_INSTRUCTION {
            if self.fail_summary {
                bail!("summary model unavailable");
            }
            Ok(format!("  {}\n", self.summary))
        } else if system == SENTIMENT_INSTRUCTION {
            self.sentiment_inputs.lock().unwrap().push(user.to_string());
            Ok(self.sentiment.clone())
        } else {
            bail!("unexpected instruction: {}", system)
        }
    }

    async fn complete_with_history(&self, turns: &[Turn]) -> Result<String> {
        self.chat_calls.lock().unwrap().push(turns.to_vec());
        if self.fail_chat {
            bail!("chat model unavailable");
        }
        Ok(self.answer.clone())
    }

    async fn is_ready(&self) -> Result<bool> {
        Ok(true)
    }
}

// ─── Scraper ────────────────────────────────────────────────────────

/// Serves canned page text; unknown URLs answer 404.
#[derive(Default)]
pub struct MockScraper {
    pages: HashMap<String, String>,
}

impl MockScraper {
    pub fn with_page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }
}

#[async_trait]
impl Scraper for MockScraper {
    async fn scrape(&self, url: &str) -> Result<String, ScrapeError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or(ScrapeError::Fetch { status: 404 })
    }
}

// ─── Index ──────────────────────────────────────────────────────────

/// An index whose task filter does nothing, like a backend with unreliable
/// metadata filtering.
#[derive(Default)]
pub struct LeakyIndex {
    pub inner: InMemoryVectorIndex,
}

#[async_trait]
impl VectorIndex for LeakyIndex {
    async fn upsert(&self, batch: &ChunkBatch) -> Result<()> {
        self.inner.upsert(batch).await
    }

    async fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        _task_filter: Option<&str>,
    ) -> Result<Vec<IndexHit>> {
        self.inner.query(vector, top_n, None).await
    }

    async fn count_for_task(&self, task_id: &str) -> Result<usize> {
        self.inner.count_for_task(task_id).await
    }
}

// ─── Store ──────────────────────────────────────────────────────────

/// In-memory store that can fail or stall selected writes.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: Arc<InMemoryRecordStore>,
    pub fail_get_conversation: bool,
    pub fail_set_conversation: bool,
    pub fail_set_url_mapping: bool,
    /// Delay applied to the first conversation write only.
    pub slow_first_conversation_write: Option<Duration>,
    pub conversation_writes: AtomicUsize,
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get_status(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        self.inner.get_status(task_id).await
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.inner.set_status(task_id, status).await
    }

    async fn get_url_mapping(&self, url: &str) -> Result<Option<UrlTaskMapping>> {
        self.inner.get_url_mapping(url).await
    }

    async fn set_url_mapping(&self, url: &str, mapping: &UrlTaskMapping) -> Result<()> {
        if self.fail_set_url_mapping {
            bail!("url mapping write refused");
        }
        self.inner.set_url_mapping(url, mapping).await
    }

    async fn get_cache(&self, url: &str) -> Result<Option<CacheEntry>> {
        self.inner.get_cache(url).await
    }

    async fn set_cache(&self, url: &str, entry: &CacheEntry) -> Result<()> {
        self.inner.set_cache(url, entry).await
    }

    async fn get_conversation(&self, task_id: &str) -> Result<Option<Vec<Turn>>> {
        if self.fail_get_conversation {
            bail!("conversation store unreachable");
        }
        self.inner.get_conversation(task_id).await
    }

    async fn set_conversation(&self, task_id: &str, turns: &[Turn]) -> Result<()> {
        let nth = self.conversation_writes.fetch_add(1, Ordering::SeqCst);
        if nth == 0 {
            if let Some(delay) = self.slow_first_conversation_write {
                tokio::time::sleep(delay).await;
            }
        }
        if self.fail_set_conversation {
            bail!("conversation write refused");
        }
        self.inner.set_conversation(task_id, turns).await
    }

    async fn list_url_mappings(&self) -> Result<Vec<(String, UrlTaskMapping)>> {
        self.inner.list_url_mappings().await
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        self.inner.status_counts().await
    }

    async fn get_flag(&self, name: &str) -> Result<Option<String>> {
        self.inner.get_flag(name).await
    }

    async fn set_flag(&self, name: &str, value: &str) -> Result<()> {
        self.inner.set_flag(name, value).await
    }

    async fn find_url_for_task(&self, task_id: &str) -> Result<Option<String>> {
        self.inner.find_url_for_task(task_id).await
    }
}

// ─── Harness ────────────────────────────────────────────────────────

pub fn test_config() -> Config {
    parse_config(
        r#"
[db]
path = "unused.sqlite"

[queue]
dequeue_timeout_ms = 50
failure_backoff_ms = 10
"#,
    )
    .unwrap()
}

pub struct Harness {
    pub services: Services,
    pub store: Arc<InMemoryRecordStore>,
    pub queue: Arc<MemoryTaskQueue>,
    pub index: Arc<dyn VectorIndex>,
    pub model: Arc<ScriptedModel>,
}

pub fn harness(model: ScriptedModel, scraper: MockScraper) -> Harness {
    harness_with_index(model, scraper, Arc::new(InMemoryVectorIndex::new()))
}

pub fn harness_with_index(
    model: ScriptedModel,
    scraper: MockScraper,
    index: Arc<dyn VectorIndex>,
) -> Harness {
    let store = Arc::new(InMemoryRecordStore::new());
    build_harness(model, scraper, index, store.clone(), store)
}

/// Services run on `store`; `Harness::store` is its inner in-memory store.
pub fn harness_with_store(model: ScriptedModel, scraper: MockScraper, store: FlakyStore) -> Harness {
    let inner = store.inner.clone();
    build_harness(
        model,
        scraper,
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(store),
        inner,
    )
}

fn build_harness(
    model: ScriptedModel,
    scraper: MockScraper,
    index: Arc<dyn VectorIndex>,
    services_store: Arc<dyn RecordStore>,
    store: Arc<InMemoryRecordStore>,
) -> Harness {
    let queue = Arc::new(MemoryTaskQueue::new());
    let model = Arc::new(model);

    let services = Services::build(
        &test_config(),
        Collaborators {
            store: services_store,
            queue: queue.clone(),
            index: index.clone(),
            model: model.clone(),
            scraper: Arc::new(scraper),
            notifier: Arc::new(NoopNotifier),
            events: queue.hub(),
        },
    );

    Harness {
        services,
        store,
        queue,
        index,
        model,
    }
}
