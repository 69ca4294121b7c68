//! Wiring: build every service from a [`Config`] and its collaborators.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use pagewise_core::index::VectorIndex;
use pagewise_core::model::ModelClient;
use pagewise_core::queue::TaskQueue;
use pagewise_core::store::RecordStore;

use crate::article::ArticleProcessor;
use crate::config::Config;
use crate::consumer::TaskConsumer;
use crate::conversation::ConversationManager;
use crate::db;
use crate::ingest::IngestionPipeline;
use crate::migrate::run_migrations;
use crate::model_client::create_model_client;
use crate::queue::{NotificationHub, SqliteTaskQueue};
use crate::readiness::{BackendNotifier, HttpBackendNotifier, NoopNotifier, ReadinessPoller};
use crate::retrieve::Retriever;
use crate::scrape::{HttpScraper, Scraper};
use crate::server::AppState;
use crate::sqlite_store::{SqliteRecordStore, SqliteVectorIndex};

/// External collaborators the services are built on.
pub struct Collaborators {
    pub store: Arc<dyn RecordStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub index: Arc<dyn VectorIndex>,
    pub model: Arc<dyn ModelClient>,
    pub scraper: Arc<dyn Scraper>,
    pub notifier: Arc<dyn BackendNotifier>,
    /// Notifications published through `queue`.
    pub events: NotificationHub,
}

pub struct Services {
    pub store: Arc<dyn RecordStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub ingestion: Arc<IngestionPipeline>,
    pub retriever: Arc<Retriever>,
    pub conversations: Arc<ConversationManager>,
    pub processor: Arc<ArticleProcessor>,
    pub consumer: Arc<TaskConsumer>,
    pub readiness: Arc<ReadinessPoller>,
    pub events: NotificationHub,
    pub results_channel: String,
}

impl Services {
    /// Open the configured database and build the production services.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        run_migrations(&pool).await?;

        let timeout = Duration::from_secs(config.model.timeout_secs);
        let notifier: Arc<dyn BackendNotifier> = match &config.readiness.notify_url {
            Some(url) => Arc::new(HttpBackendNotifier::new(url.clone(), timeout)?),
            None => Arc::new(NoopNotifier),
        };

        let queue = SqliteTaskQueue::new(pool.clone(), config.queue.name.clone());
        let parts = Collaborators {
            store: Arc::new(SqliteRecordStore::new(pool.clone())),
            events: queue.hub(),
            queue: Arc::new(queue),
            index: Arc::new(SqliteVectorIndex::new(pool)),
            model: create_model_client(&config.model)?,
            scraper: Arc::new(HttpScraper::new(timeout)?),
            notifier,
        };
        Ok(Self::build(config, parts))
    }

    pub fn build(config: &Config, parts: Collaborators) -> Self {
        let ingestion = Arc::new(IngestionPipeline::new(
            parts.model.clone(),
            parts.index.clone(),
            config.chunking.max_size,
        ));
        let retriever = Arc::new(
            Retriever::new(parts.model.clone(), parts.index.clone())
                .with_limits(config.retrieval.candidate_k, config.retrieval.top_k),
        );
        let conversations = Arc::new(ConversationManager::new(
            parts.store.clone(),
            parts.model.clone(),
            retriever.clone(),
        ));
        let processor = Arc::new(ArticleProcessor::new(parts.model.clone(), ingestion.clone()));
        let consumer = Arc::new(TaskConsumer::new(
            parts.queue.clone(),
            parts.store.clone(),
            parts.scraper,
            processor.clone(),
            &config.queue,
        ));
        let readiness = Arc::new(ReadinessPoller::new(
            parts.model,
            parts.store.clone(),
            parts.notifier,
            Duration::from_secs(config.readiness.poll_interval_secs),
        ));

        Self {
            store: parts.store,
            queue: parts.queue,
            ingestion,
            retriever,
            conversations,
            processor,
            consumer,
            readiness,
            events: parts.events,
            results_channel: config.queue.results_channel.clone(),
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            queue: self.queue.clone(),
            conversations: self.conversations.clone(),
            readiness: self.readiness.clone(),
            events: self.events.clone(),
            results_channel: self.results_channel.clone(),
        }
    }
}
