//! Vector storage.
//!
//! The [`VectorStore`] trait is the only seam between index building /
//! retrieval and the persisted embeddings. Two backends:
//!
//! - [`SqliteVectorStore`]: a SQLite file at the configured dataset path.
//!   Vectors are stored as little-endian `f32` BLOBs and similarity search
//!   is brute-force cosine in Rust.
//! - [`InMemoryVectorStore`]: `RwLock`-guarded `Vec`, for tests and
//!   throwaway sessions.
//!
//! Both follow an overwrite-on-rebuild policy: [`VectorStore::overwrite`]
//! discards everything previously stored before writing the new set, and
//! stamps the new set with a fresh index id. Searches name the index id
//! they were built against; a search against a replaced index fails with
//! [`StoreError::Replaced`] instead of returning another build's rows.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{Chunk, RetrievedChunk};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("index {index_id} was replaced by a newer ingestion; load the repository again")]
    Replaced { index_id: String },
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replace the entire contents of the store with `chunks` and their
    /// `vectors`. Returns the id of the new index.
    async fn overwrite(&self, chunks: &[Chunk], vectors: &[Vec<f32>], model: &str)
        -> Result<String>;

    /// Id of the most recent build, if any.
    async fn current_index_id(&self) -> Result<Option<String>>;

    /// Return up to `top_k` chunks of index `index_id` ordered by descending
    /// cosine similarity. Fails with [`StoreError::Replaced`] when
    /// `index_id` is no longer the current build.
    async fn similarity_search(
        &self,
        index_id: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Number of stored chunks.
    async fn len(&self) -> Result<usize>;
}

fn new_index_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn ensure_current(current: Option<&str>, index_id: &str) -> Result<()> {
    if current != Some(index_id) {
        return Err(StoreError::Replaced {
            index_id: index_id.to_string(),
        }
        .into());
    }
    Ok(())
}

fn check_lengths(chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        bail!(
            "chunk/vector count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        );
    }
    Ok(())
}

fn rank(mut candidates: Vec<RetrievedChunk>, top_k: usize) -> Vec<RetrievedChunk> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(top_k);
    candidates
}

// ============ SQLite ============

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open the dataset at `path`, creating the file and schema if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn overwrite(
        &self,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<String> {
        check_lengths(chunks, vectors)?;
        let now = chrono::Utc::now().timestamp();
        let index_id = new_index_id();

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO dataset_meta (key, value) VALUES ('index_id', ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(&index_id)
        .execute(&mut *tx)
        .await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, index_id, file_path, chunk_index, text, hash,
                                    metadata_json, embedding, model, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&index_id)
            .bind(&chunk.file_path)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(&chunk.metadata_json)
            .bind(vec_to_blob(vector))
            .bind(model)
            .bind(vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(chunks = chunks.len(), %index_id, "dataset overwritten");
        Ok(index_id)
    }

    async fn current_index_id(&self) -> Result<Option<String>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT value FROM dataset_meta WHERE key = 'index_id'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    async fn similarity_search(
        &self,
        index_id: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let current = self.current_index_id().await?;
        ensure_current(current.as_deref(), index_id)?;

        // Fetch the build's vectors and compute cosine similarity in Rust
        let rows =
            sqlx::query("SELECT id, file_path, text, embedding FROM chunks WHERE index_id = ?")
                .bind(index_id)
                .fetch_all(&self.pool)
                .await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                RetrievedChunk {
                    chunk_id: row.get("id"),
                    file_path: row.get("file_path"),
                    text: row.get("text"),
                    score: cosine_similarity(query, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank(candidates, top_k))
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

// ============ In-memory ============

struct StoredVector {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Default)]
struct MemoryState {
    index_id: Option<String>,
    entries: Vec<StoredVector>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    state: RwLock<MemoryState>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn overwrite(
        &self,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        _model: &str,
    ) -> Result<String> {
        check_lengths(chunks, vectors)?;
        let mut state = self
            .state
            .write()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        let index_id = new_index_id();
        state.index_id = Some(index_id.clone());
        state.entries = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| StoredVector {
                chunk: chunk.clone(),
                vector: vector.clone(),
            })
            .collect();
        Ok(index_id)
    }

    async fn current_index_id(&self) -> Result<Option<String>> {
        Ok(self.read()?.index_id.clone())
    }

    async fn similarity_search(
        &self,
        index_id: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let state = self.read()?;
        ensure_current(state.index_id.as_deref(), index_id)?;
        let candidates = state
            .entries
            .iter()
            .map(|e| RetrievedChunk {
                chunk_id: e.chunk.id.clone(),
                file_path: e.chunk.file_path.clone(),
                text: e.chunk.text.clone(),
                score: cosine_similarity(query, &e.vector),
            })
            .collect();
        Ok(rank(candidates, top_k))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }
}
