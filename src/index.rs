//! Index building.
//!
//! [`IndexBuilder::build`] turns fetched documents into a queryable
//! [`VectorIndex`]: chunk → embed in batches → overwrite the store. The
//! index is a cheap handle (`Arc`s) that hands out query and chat engines.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::chat::ChatEngine;
use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::{embed_batched, embed_query, Embedder};
use crate::llm::ChatModel;
use crate::models::{Chunk, Document, RetrievedChunk};
use crate::query::QueryEngine;
use crate::store::{StoreError, VectorStore};

pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    max_tokens: usize,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        max_tokens: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            max_tokens,
            batch_size,
        }
    }

    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self::new(
            embedder,
            store,
            config.chunking.max_tokens,
            config.embedding.batch_size,
        )
    }

    /// Embed every document and replace the store's contents with the result.
    ///
    /// An empty document set is valid and yields an empty index.
    pub async fn build(&self, documents: &[Document]) -> Result<VectorIndex> {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| chunk_document(doc, self.max_tokens))
            .collect();
        tracing::info!(
            documents = documents.len(),
            chunks = chunks.len(),
            "building index"
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
            .await
            .context("Failed to embed repository documents")?;

        let index_id = self
            .store
            .overwrite(&chunks, &vectors, self.embedder.model_name())
            .await
            .context("Failed to write vector store")?;

        Ok(VectorIndex {
            index_id,
            embedder: self.embedder.clone(),
            store: self.store.clone(),
            document_count: documents.len(),
            chunk_count: chunks.len(),
        })
    }
}

/// Handle over one build of a vector store.
///
/// Stays valid until the store is overwritten by another build; after that
/// every retrieval fails with [`StoreError::Replaced`].
#[derive(Clone)]
pub struct VectorIndex {
    index_id: String,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    document_count: usize,
    chunk_count: usize,
}

impl VectorIndex {
    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// The `top_k` chunks most similar to `query`.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        // The cached counts describe this build only.
        if !self.is_current().await? {
            return Err(StoreError::Replaced {
                index_id: self.index_id.clone(),
            }
            .into());
        }
        if self.chunk_count == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        self.store
            .similarity_search(&self.index_id, &query_vec, top_k)
            .await
    }

    /// False once another build has overwritten the store.
    pub async fn is_current(&self) -> Result<bool> {
        let current = self.store.current_index_id().await?;
        Ok(current.as_deref() == Some(self.index_id.as_str()))
    }

    pub fn as_query_engine(&self, llm: Arc<dyn ChatModel>, top_k: usize) -> QueryEngine {
        QueryEngine::new(self.clone(), llm, top_k)
    }

    pub fn as_chat_engine(&self, llm: Arc<dyn ChatModel>, top_k: usize) -> ChatEngine {
        ChatEngine::new(self.as_query_engine(llm.clone(), top_k), llm)
    }
}
