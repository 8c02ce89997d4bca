//! Persistent vector store.
//!
//! The [`VectorStore`] trait is what the ingestion pipeline and the chat
//! engine depend on; [`SqliteVectorStore`] is the disk-backed implementation
//! living in the configured persist directory.
//!
//! # Concurrency
//!
//! Each store owns one `tokio::sync::RwLock`. Writers ([`add`](VectorStore::add),
//! [`replace_source`](VectorStore::replace_source), [`clear`](VectorStore::clear))
//! hold it exclusively; readers ([`query`](VectorStore::query),
//! [`count`](VectorStore::count), [`status`](VectorStore::status)) share it.
//! Multi-row writes run in a single SQLite transaction, so a failed upload
//! never leaves partial entries behind.
//!
//! # Embedding consistency
//!
//! Every entry records the `provider/model` identity and dimensionality of
//! its vector. Writing or querying with a different identity or width fails
//! with [`RagError::EmbeddingMismatch`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{RagError, RagResult};
use crate::migrate;
use crate::models::{EmbeddedChunk, ScoredChunk, StoreStatus};

const DB_FILE: &str = "vectors.sqlite";

/// Result of replacing a source's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub removed: u64,
    pub total: u64,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append entries. Returns the new total entry count.
    async fn add(&self, entries: &[EmbeddedChunk], embedding_model: &str) -> RagResult<u64>;

    /// Atomically drop every entry whose source is `source` and append `entries`.
    async fn replace_source(
        &self,
        source: &str,
        entries: &[EmbeddedChunk],
        embedding_model: &str,
    ) -> RagResult<ReplaceOutcome>;

    /// Top-`k` entries by descending cosine similarity to `embedding`.
    async fn query(
        &self,
        embedding: &[f32],
        embedding_model: &str,
        k: usize,
    ) -> RagResult<Vec<ScoredChunk>>;

    async fn count(&self) -> RagResult<u64>;

    /// Delete every entry. Returns how many were removed.
    async fn clear(&self) -> RagResult<u64>;

    async fn status(&self) -> RagResult<StoreStatus>;
}

/// SQLite-backed store; vectors are BLOBs scanned with brute-force cosine.
pub struct SqliteVectorStore {
    pool: SqlitePool,
    persist_directory: PathBuf,
    lock: RwLock<()>,
}

impl SqliteVectorStore {
    /// Open the store in `persist_directory`, creating it if missing.
    pub async fn open(persist_directory: &Path) -> anyhow::Result<Self> {
        let pool = db::connect(&persist_directory.join(DB_FILE)).await?;
        migrate::run_migrations(&pool).await?;

        tracing::info!(
            persist_directory = %persist_directory.display(),
            "Vector store opened"
        );

        Ok(Self {
            pool,
            persist_directory: persist_directory.to_path_buf(),
            lock: RwLock::new(()),
        })
    }

    /// Close the connection pool; pending writes are flushed.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn stored_identity(&self) -> RagResult<Option<(String, usize)>> {
        self.identity_excluding("").await
    }

    async fn identity_excluding(&self, source: &str) -> RagResult<Option<(String, usize)>> {
        let row = sqlx::query("SELECT embedding_model, dims FROM entries WHERE source != ? LIMIT 1")
            .bind(source)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| {
            let dims: i64 = r.get("dims");
            (r.get("embedding_model"), dims as usize)
        }))
    }

    /// Reject vectors that cannot be compared with what is already stored.
    async fn check_identity(&self, embedding_model: &str, dims: usize) -> RagResult<()> {
        self.check_identity_excluding("", embedding_model, dims).await
    }

    async fn check_identity_excluding(
        &self,
        source: &str,
        embedding_model: &str,
        dims: usize,
    ) -> RagResult<()> {
        if let Some((model, stored_dims)) = self.identity_excluding(source).await? {
            if model != embedding_model || stored_dims != dims {
                return Err(RagError::EmbeddingMismatch {
                    expected: format!("{} ({} dims)", model, stored_dims),
                    actual: format!("{} ({} dims)", embedding_model, dims),
                });
            }
        }
        Ok(())
    }

    async fn count_unlocked(&self) -> RagResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Common dimensionality of a batch, `None` when empty.
    fn batch_dims(entries: &[EmbeddedChunk], embedding_model: &str) -> RagResult<Option<usize>> {
        let Some(first) = entries.first() else {
            return Ok(None);
        };
        let dims = first.embedding.len();
        if dims == 0 {
            return Err(RagError::Storage(anyhow::anyhow!(
                "refusing to store empty embedding vectors"
            )));
        }
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dims) {
            return Err(RagError::EmbeddingMismatch {
                expected: format!("{} ({} dims)", embedding_model, dims),
                actual: format!("{} ({} dims)", embedding_model, bad.embedding.len()),
            });
        }
        Ok(Some(dims))
    }
}

async fn insert_entries(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entries: &[EmbeddedChunk],
    embedding_model: &str,
    dims: usize,
) -> RagResult<()> {
    let now = chrono::Utc::now().timestamp();
    for entry in entries {
        let chunk = &entry.chunk;
        sqlx::query(
            r#"
            INSERT INTO entries (id, source, chunk_index, total_chunks, text, char_len,
                                 hash, embedding, embedding_model, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&chunk.source)
        .bind(chunk.chunk_index)
        .bind(chunk.total_chunks)
        .bind(&chunk.text)
        .bind(chunk.char_len)
        .bind(&chunk.hash)
        .bind(vec_to_blob(&entry.embedding))
        .bind(embedding_model)
        .bind(dims as i64)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(&self, entries: &[EmbeddedChunk], embedding_model: &str) -> RagResult<u64> {
        let _guard = self.lock.write().await;

        if let Some(dims) = Self::batch_dims(entries, embedding_model)? {
            self.check_identity(embedding_model, dims).await?;
            let mut tx = self.pool.begin().await?;
            insert_entries(&mut tx, entries, embedding_model, dims).await?;
            tx.commit().await?;
        }

        self.count_unlocked().await
    }

    async fn replace_source(
        &self,
        source: &str,
        entries: &[EmbeddedChunk],
        embedding_model: &str,
    ) -> RagResult<ReplaceOutcome> {
        let _guard = self.lock.write().await;

        let dims = Self::batch_dims(entries, embedding_model)?;
        // Entries of this source are about to go; only the others must match.
        if let Some(dims) = dims {
            self.check_identity_excluding(source, embedding_model, dims)
                .await?;
        }

        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM entries WHERE source = ?")
            .bind(source)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if let Some(dims) = dims {
            insert_entries(&mut tx, entries, embedding_model, dims).await?;
        }
        tx.commit().await?;

        Ok(ReplaceOutcome {
            removed,
            total: self.count_unlocked().await?,
        })
    }

    async fn query(
        &self,
        embedding: &[f32],
        embedding_model: &str,
        k: usize,
    ) -> RagResult<Vec<ScoredChunk>> {
        let _guard = self.lock.read().await;

        if k == 0 {
            return Ok(Vec::new());
        }
        self.check_identity(embedding_model, embedding.len()).await?;

        let rows = sqlx::query("SELECT source, chunk_index, text, embedding FROM entries")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ScoredChunk {
                    source: row.get("source"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: cosine_similarity(embedding, &blob_to_vec(&blob)),
                }
            })
            .collect();

        // Sort: score desc, source asc, chunk_index asc (deterministic)
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source.cmp(&b.source))
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        scored.truncate(k);

        Ok(scored)
    }

    async fn count(&self) -> RagResult<u64> {
        let _guard = self.lock.read().await;
        self.count_unlocked().await
    }

    async fn clear(&self) -> RagResult<u64> {
        let _guard = self.lock.write().await;

        let removed = sqlx::query("DELETE FROM entries")
            .execute(&self.pool)
            .await?
            .rows_affected();
        sqlx::query("VACUUM").execute(&self.pool).await?;

        tracing::info!(removed, "Vector store cleared");
        Ok(removed)
    }

    async fn status(&self) -> RagResult<StoreStatus> {
        let _guard = self.lock.read().await;

        let total = self.count_unlocked().await?;
        let identity = self.stored_identity().await?;

        Ok(StoreStatus {
            initialized: total > 0,
            total_documents: total,
            persist_directory: self.persist_directory.display().to_string(),
            embedding_model: identity.as_ref().map(|(m, _)| m.clone()),
            embedding_dims: identity.map(|(_, d)| d),
        })
    }
}
