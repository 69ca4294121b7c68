//! Article processing: best-effort ingestion, then summary and sentiment.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use pagewise_core::model::ModelClient;

use crate::ingest::{IngestOutcome, IngestionPipeline};

pub const SUMMARY_INSTRUCTION: &str = "You will be given the text content scraped from a web page. \
Write a concise summary of what the page is about in a few sentences.";

pub const SENTIMENT_INSTRUCTION: &str = "Classify the overall sentiment of the following text. \
Answer with a single word: positive, negative, or neutral.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleDigest {
    pub summary: String,
    pub sentiment: String,
    pub ingestion: IngestOutcome,
}

pub struct ArticleProcessor {
    model: Arc<dyn ModelClient>,
    ingestion: Arc<IngestionPipeline>,
}

impl ArticleProcessor {
    pub fn new(model: Arc<dyn ModelClient>, ingestion: Arc<IngestionPipeline>) -> Self {
        Self { model, ingestion }
    }

    /// Index the text, then ask for a summary and the summary's sentiment.
    ///
    /// Ingestion never fails this call. Either model call failing does.
    pub async fn process(&self, task_id: &str, text: &str) -> Result<ArticleDigest> {
        let ingestion = self.ingestion.ingest(task_id, text).await;
        if ingestion.is_failure() {
            warn!(task_id, outcome = ?ingestion, "ingestion failed, continuing to summary");
        }

        let summary = self
            .model
            .complete(SUMMARY_INSTRUCTION, text)
            .await
            .context("Summary generation failed")?
            .trim()
            .to_string();

        let sentiment = self
            .model
            .complete(SENTIMENT_INSTRUCTION, &summary)
            .await
            .context("Sentiment classification failed")?
            .trim()
            .to_string();

        info!(task_id, sentiment = %sentiment, "article processed");
        Ok(ArticleDigest {
            summary,
            sentiment,
            ingestion,
        })
    }
}
