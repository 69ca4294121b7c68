//! SQLite-backed [`RecordStore`] and [`VectorIndex`] implementations.
//!
//! Both wrap a shared [`SqlitePool`] and map each trait operation onto the
//! tables created by [`crate::migrate::run_migrations`]. Vector search is
//! brute-force cosine similarity over the stored embeddings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use pagewise_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use pagewise_core::index::{ChunkBatch, IndexHit, VectorIndex};
use pagewise_core::models::{CacheEntry, ChunkMetadata, TaskStatus, Turn, UrlTaskMapping};
use pagewise_core::store::{RecordStore, StatusCounts};

/// SQLite implementation of [`RecordStore`].
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn parse_status(raw: &str) -> Result<TaskStatus> {
    raw.parse::<TaskStatus>()
        .with_context(|| format!("corrupt status value in database: {}", raw))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_status(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT status FROM task_status WHERE task_id = ?")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
        raw.as_deref().map(parse_status).transpose()
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_status (task_id, status, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_url_mapping(&self, url: &str) -> Result<Option<UrlTaskMapping>> {
        let row = sqlx::query("SELECT task_id, status FROM url_tasks WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| -> Result<UrlTaskMapping> {
            let status: String = r.get("status");
            Ok(UrlTaskMapping {
                task_id: r.get("task_id"),
                status: parse_status(&status)?,
            })
        })
        .transpose()
    }

    async fn set_url_mapping(&self, url: &str, mapping: &UrlTaskMapping) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO url_tasks (url, task_id, status) VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET task_id = excluded.task_id, status = excluded.status
            "#,
        )
        .bind(url)
        .bind(&mapping.task_id)
        .bind(mapping.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_cache(&self, url: &str) -> Result<Option<CacheEntry>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT entry_json FROM result_cache WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;
        raw.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("corrupt cache entry for url: {}", url))
        })
        .transpose()
    }

    async fn set_cache(&self, url: &str, entry: &CacheEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        sqlx::query(
            r#"
            INSERT INTO result_cache (url, entry_json, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET entry_json = excluded.entry_json, updated_at = excluded.updated_at
            "#,
        )
        .bind(url)
        .bind(json)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_conversation(&self, task_id: &str) -> Result<Option<Vec<Turn>>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT turns_json FROM conversations WHERE task_id = ?")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
        raw.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("corrupt conversation for task: {}", task_id))
        })
        .transpose()
    }

    async fn set_conversation(&self, task_id: &str, turns: &[Turn]) -> Result<()> {
        let json = serde_json::to_string(turns)?;
        sqlx::query(
            r#"
            INSERT INTO conversations (task_id, turns_json, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET turns_json = excluded.turns_json, updated_at = excluded.updated_at
            "#,
        )
        .bind(task_id)
        .bind(json)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_url_mappings(&self) -> Result<Vec<(String, UrlTaskMapping)>> {
        let rows = sqlx::query("SELECT url, task_id, status FROM url_tasks ORDER BY url")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| -> Result<(String, UrlTaskMapping)> {
                let status: String = r.get("status");
                Ok((
                    r.get("url"),
                    UrlTaskMapping {
                        task_id: r.get("task_id"),
                        status: parse_status(&status)?,
                    },
                ))
            })
            .collect()
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM task_status GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = StatusCounts::default();
        for row in &rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            match parse_status(&status)? {
                TaskStatus::Pending => counts.pending = n as u64,
                TaskStatus::Processing => counts.processing = n as u64,
                TaskStatus::Done => counts.done = n as u64,
                TaskStatus::Failed => counts.failed = n as u64,
            }
        }
        Ok(counts)
    }

    async fn get_flag(&self, name: &str) -> Result<Option<String>> {
        Ok(sqlx::query_scalar("SELECT value FROM flags WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn set_flag(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO flags (name, value) VALUES (?, ?) ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_url_for_task(&self, task_id: &str) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT url FROM url_tasks WHERE task_id = ? ORDER BY url LIMIT 1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

/// SQLite implementation of [`VectorIndex`].
///
/// A batch is written inside one transaction, so either every chunk of the
/// batch lands or none does.
#[derive(Clone)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, batch: &ChunkBatch) -> Result<()> {
        let n = batch.validate()?;
        let mut tx = self.pool.begin().await?;

        for i in 0..n {
            let vector = &batch.vectors[i];
            let meta = &batch.metadata[i];
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, task_id, chunk_index, total_chunks, document, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    task_id = excluded.task_id,
                    chunk_index = excluded.chunk_index,
                    total_chunks = excluded.total_chunks,
                    document = excluded.document,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&batch.ids[i])
            .bind(&meta.task_id)
            .bind(meta.chunk_index as i64)
            .bind(meta.total_chunks as i64)
            .bind(&batch.documents[i])
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        task_filter: Option<&str>,
    ) -> Result<Vec<IndexHit>> {
        let rows = match task_filter {
            Some(task_id) => {
                sqlx::query(
                    "SELECT chunk_id, task_id, chunk_index, total_chunks, document, embedding FROM chunk_vectors WHERE task_id = ?",
                )
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT chunk_id, task_id, chunk_index, total_chunks, document, embedding FROM chunk_vectors",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut hits: Vec<IndexHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let chunk_index: i64 = row.get("chunk_index");
                let total_chunks: i64 = row.get("total_chunks");
                IndexHit {
                    id: row.get("chunk_id"),
                    document: row.get("document"),
                    metadata: ChunkMetadata {
                        task_id: row.get("task_id"),
                        chunk_index: chunk_index as usize,
                        total_chunks: total_chunks as usize,
                    },
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                }
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
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}
