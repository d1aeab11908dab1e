//! One-shot question answering over a [`VectorIndex`].
//!
//! Each call retrieves the most similar chunks, packs them into the
//! question-answering prompt, and asks the generation model. Calls are
//! independent of one another.

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::index::VectorIndex;
use crate::llm::ChatModel;
use crate::models::{ChatMessage, RetrievedChunk};

/// An answer plus the chunks it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub response: String,
    pub source_nodes: Vec<RetrievedChunk>,
}

impl fmt::Display for QueryResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.response)
    }
}

#[derive(Clone)]
pub struct QueryEngine {
    index: VectorIndex,
    llm: Arc<dyn ChatModel>,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(index: VectorIndex, llm: Arc<dyn ChatModel>, top_k: usize) -> Self {
        Self { index, llm, top_k }
    }

    pub async fn query(&self, question: &str) -> Result<QueryResponse> {
        let source_nodes = self.index.retrieve(question, self.top_k).await?;
        tracing::debug!(hits = source_nodes.len(), "retrieved context");

        let prompt = text_qa_prompt(&format_context(&source_nodes), question);
        let response = self.llm.complete(&[ChatMessage::user(prompt)]).await?;

        Ok(QueryResponse {
            response,
            source_nodes,
        })
    }
}

/// Join retrieved chunks into the context block, each headed by its file path.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("file_path: {}\n\n{}", c.file_path, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn text_qa_prompt(context: &str, question: &str) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {question}\n\
         Answer: "
    )
}
