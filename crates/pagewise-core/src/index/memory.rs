//! In-memory [`VectorIndex`] for tests and single-process deployments.
//!
//! Brute-force cosine similarity over every stored vector behind a
//! `std::sync::RwLock`.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::ChunkMetadata;

use super::{ChunkBatch, IndexHit, VectorIndex};

struct StoredChunk {
    id: String,
    vector: Vec<f32>,
    document: String,
    metadata: ChunkMetadata,
}

/// In-memory vector index.
pub struct InMemoryVectorIndex {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Total number of stored chunks across all tasks.
    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, batch: &ChunkBatch) -> Result<()> {
        batch.validate()?;

        let mut stored = self
            .chunks
            .write()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        stored.retain(|c| !batch.ids.contains(&c.id));
        for i in 0..batch.len() {
            stored.push(StoredChunk {
                id: batch.ids[i].clone(),
                vector: batch.vectors[i].clone(),
                document: batch.documents[i].clone(),
                metadata: batch.metadata[i].clone(),
            });
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        task_filter: Option<&str>,
    ) -> Result<Vec<IndexHit>> {
        let stored = self
            .chunks
            .read()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        let mut hits: Vec<IndexHit> = stored
            .iter()
            .filter(|c| task_filter.map_or(true, |t| c.metadata.task_id == t))
            .map(|c| IndexHit {
                id: c.id.clone(),
                document: c.document.clone(),
                metadata: c.metadata.clone(),
                score: cosine_similarity(vector, &c.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_n);
        Ok(hits)
    }

    async fn count_for_task(&self, task_id: &str) -> Result<usize> {
        let stored = self
            .chunks
            .read()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        Ok(stored.iter().filter(|c| c.metadata.task_id == task_id).count())
    }
}
