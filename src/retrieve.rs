//! Retrieval step: ground a query in the chunks indexed for one task.
//!
//! The index is over-queried (`candidate_k` hits) and the hits are filtered
//! by task id here, even though the same filter is passed to the index.
//! The surviving `top_k` chunks, in similarity order, are joined with single
//! spaces. An empty string means "no context", which is not an error.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use pagewise_core::embedding::normalize_embedding;
use pagewise_core::index::VectorIndex;
use pagewise_core::model::ModelClient;

pub const DEFAULT_CANDIDATE_K: usize = 10;
pub const DEFAULT_TOP_K: usize = 3;

pub struct Retriever {
    model: Arc<dyn ModelClient>,
    index: Arc<dyn VectorIndex>,
    candidate_k: usize,
    top_k: usize,
}

impl Retriever {
    pub fn new(model: Arc<dyn ModelClient>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            model,
            index,
            candidate_k: DEFAULT_CANDIDATE_K,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_limits(mut self, candidate_k: usize, top_k: usize) -> Self {
        self.candidate_k = candidate_k;
        self.top_k = top_k;
        self
    }

    /// Build the context string for `query` from `task_id`'s chunks.
    ///
    /// # Errors
    ///
    /// Propagates failures reaching the model or the index. A malformed
    /// query embedding yields empty context instead.
    pub async fn retrieve(&self, task_id: &str, query: &str) -> Result<String> {
        let raw = self
            .model
            .embed(query)
            .await
            .context("Failed to embed query")?;
        let Some(vector) = normalize_embedding(&raw) else {
            warn!(task_id, "malformed query embedding, continuing without context");
            return Ok(String::new());
        };

        let hits = self
            .index
            .query(&vector, self.candidate_k, Some(task_id))
            .await
            .context("Vector index query failed")?;

        let candidates = hits.len();
        let context = hits
            .into_iter()
            .filter(|hit| hit.metadata.task_id == task_id)
            .take(self.top_k)
            .map(|hit| hit.document)
            .collect::<Vec<_>>()
            .join(" ");

        debug!(task_id, candidates, context_len = context.len(), "retrieved context");
        Ok(context)
    }
}
