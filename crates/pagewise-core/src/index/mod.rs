//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the narrow interface to a nearest-neighbor
//! store keyed by chunk id. Chunks are written in [`ChunkBatch`]es made of
//! four parallel arrays (ids, vectors, documents, metadata). A batch whose
//! arrays disagree in length is rejected as a whole; implementations must
//! call [`ChunkBatch::validate`] before touching storage so that a partial
//! batch is never persisted.
//!
//! The optional task filter passed to [`VectorIndex::query`] is a hint. Some
//! backends apply metadata filters unreliably, so callers re-check the
//! returned metadata themselves.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::ChunkMetadata;

/// Raised when a batch's parallel arrays have different lengths.
#[derive(Debug, Error, PartialEq, Eq)]
#[error(
    "chunk batch arrays are misaligned: ids={ids} vectors={vectors} documents={documents} metadata={metadata}"
)]
pub struct BatchMismatch {
    pub ids: usize,
    pub vectors: usize,
    pub documents: usize,
    pub metadata: usize,
}

/// Parallel arrays describing a set of chunks to index together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkBatch {
    pub ids: Vec<String>,
    pub vectors: Vec<Vec<f32>>,
    pub documents: Vec<String>,
    pub metadata: Vec<ChunkMetadata>,
}

impl ChunkBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk to all four arrays.
    pub fn push(&mut self, id: String, vector: Vec<f32>, document: String, metadata: ChunkMetadata) {
        self.ids.push(id);
        self.vectors.push(vector);
        self.documents.push(document);
        self.metadata.push(metadata);
    }

    /// Number of ids in the batch. Only meaningful after [`validate`](Self::validate).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Verify all four arrays have the same length and return it.
    pub fn validate(&self) -> Result<usize, BatchMismatch> {
        let n = self.ids.len();
        if self.vectors.len() == n && self.documents.len() == n && self.metadata.len() == n {
            Ok(n)
        } else {
            Err(BatchMismatch {
                ids: self.ids.len(),
                vectors: self.vectors.len(),
                documents: self.documents.len(),
                metadata: self.metadata.len(),
            })
        }
    }
}

/// A ranked hit returned by [`VectorIndex::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub document: String,
    pub metadata: ChunkMetadata,
    /// Similarity to the query vector; higher is closer.
    pub score: f32,
}

/// Nearest-neighbor store for chunk embeddings.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Write a whole batch, or nothing |
/// | [`query`](VectorIndex::query) | Top-N hits by similarity, best first |
/// | [`count_for_task`](VectorIndex::count_for_task) | Number of chunks indexed for a task |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace every chunk of the batch in a single write.
    ///
    /// Fails without writing anything if the batch is misaligned.
    async fn upsert(&self, batch: &ChunkBatch) -> Result<()>;

    /// Return up to `top_n` hits ranked by similarity to `vector`.
    ///
    /// `task_filter` asks the backend to restrict hits to one task; callers
    /// must not rely on it being honored.
    async fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        task_filter: Option<&str>,
    ) -> Result<Vec<IndexHit>>;

    /// Number of chunks stored for `task_id`.
    async fn count_for_task(&self, task_id: &str) -> Result<usize>;
}
