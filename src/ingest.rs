//! Ingestion pipeline: chunk → embed → validate → index.
//!
//! Ingestion is best-effort. Nothing in here returns an error to the caller;
//! every outcome, including failure, is reported as an [`IngestOutcome`] so
//! the owning task can carry on to summarization.

use std::sync::Arc;

use tracing::{debug, info, warn};

use pagewise_core::chunk::chunk_text;
use pagewise_core::embedding::normalize_embedding;
use pagewise_core::index::{ChunkBatch, VectorIndex};
use pagewise_core::model::ModelClient;
use pagewise_core::models::{chunk_id, ChunkMetadata};

/// Chunks shorter than this many characters are not worth embedding.
pub const MIN_CHUNK_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Every chunk was embedded and written.
    Complete { written: usize },
    /// Some chunks were skipped; the rest were written in one batch.
    Partial { written: usize, skipped: usize },
    /// Input failed validation; nothing was attempted.
    Skipped { reason: String },
    /// Nothing was written.
    Failed { reason: String },
}

impl IngestOutcome {
    pub fn written(&self) -> usize {
        match self {
            IngestOutcome::Complete { written } | IngestOutcome::Partial { written, .. } => {
                *written
            }
            _ => 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, IngestOutcome::Failed { .. })
    }
}

pub struct IngestionPipeline {
    model: Arc<dyn ModelClient>,
    index: Arc<dyn VectorIndex>,
    max_chunk_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        model: Arc<dyn ModelClient>,
        index: Arc<dyn VectorIndex>,
        max_chunk_size: usize,
    ) -> Self {
        Self {
            model,
            index,
            max_chunk_size,
        }
    }

    /// Index `text` under `task_id`.
    ///
    /// Chunk ids are positional (`{task_id}_chunk_{i}` over the chunker's
    /// output), so a skipped chunk leaves a gap rather than shifting later ids.
    pub async fn ingest(&self, task_id: &str, text: &str) -> IngestOutcome {
        if task_id.trim().is_empty() {
            return skipped("missing task id");
        }
        if text.trim().is_empty() {
            return skipped("article text is blank");
        }

        let chunks = chunk_text(text, self.max_chunk_size);
        let total = chunks.len();
        let mut batch = ChunkBatch::new();
        let mut skipped_chunks = 0usize;

        for (i, chunk) in chunks.into_iter().enumerate() {
            if chunk.trim().chars().count() < MIN_CHUNK_CHARS {
                debug!(task_id, chunk_index = i, "skipping short chunk");
                skipped_chunks += 1;
                continue;
            }

            let raw = match self.model.embed(&chunk).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(task_id, chunk_index = i, error = %e, "embedding failed, skipping chunk");
                    skipped_chunks += 1;
                    continue;
                }
            };
            let Some(vector) = normalize_embedding(&raw) else {
                warn!(task_id, chunk_index = i, "malformed embedding, skipping chunk");
                skipped_chunks += 1;
                continue;
            };

            batch.push(
                chunk_id(task_id, i),
                vector,
                chunk,
                ChunkMetadata {
                    task_id: task_id.to_string(),
                    chunk_index: i,
                    total_chunks: total,
                },
            );
        }

        self.write(task_id, batch, skipped_chunks).await
    }

    async fn write(&self, task_id: &str, batch: ChunkBatch, skipped: usize) -> IngestOutcome {
        let written = match batch.validate() {
            Ok(n) => n,
            Err(e) => {
                warn!(task_id, error = %e, "refusing to write misaligned batch");
                return failed(e.to_string());
            }
        };
        if written == 0 {
            warn!(task_id, skipped, "no chunk could be embedded");
            return failed("no chunk could be embedded");
        }

        if let Err(e) = self.index.upsert(&batch).await {
            warn!(task_id, error = %e, "vector index write failed");
            return failed(format!("vector index write failed: {:#}", e));
        }

        info!(task_id, written, skipped, "indexed article");
        if skipped == 0 {
            IngestOutcome::Complete { written }
        } else {
            IngestOutcome::Partial { written, skipped }
        }
    }
}

fn skipped(reason: &str) -> IngestOutcome {
    debug!(reason, "ingestion skipped");
    IngestOutcome::Skipped {
        reason: reason.to_string(),
    }
}

fn failed(reason: impl Into<String>) -> IngestOutcome {
    IngestOutcome::Failed {
        reason: reason.into(),
    }
}
