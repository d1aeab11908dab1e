//! Core data models used throughout the crate.
//!
//! These types represent the repositories, documents, chunks, and chat
//! messages that flow through the ingestion and query pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An `(owner, name)` pair identifying a GitHub repository.
///
/// Only constructed from a successful URL parse, so both fields are
/// always non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryReference {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// One fetched file: its text plus descriptive metadata
/// (`file_path`, `file_name`, `url`, `branch`).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The repository-relative path, or `"<unknown>"` when absent.
    pub fn file_path(&self) -> &str {
        self.metadata
            .get("file_path")
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    /// Metadata rendered as a single `{key: value, ...}` line for display.
    pub fn metadata_line(&self) -> String {
        let body = self
            .metadata
            .iter()
            .map(|(k, v)| format!("'{}': '{}'", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{}}}", body)
    }
}

/// A chunk of a document's text, ready to be embedded.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub chunk_index: i64,
    pub file_path: String,
    pub text: String,
    pub hash: String,
    pub metadata_json: String,
}

/// A chunk returned from similarity search, with its cosine score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub file_path: String,
    pub text: String,
    pub score: f32,
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered, append-only record of one chat session's turns.
///
/// Lives only as long as its session; never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatTranscript {
    entries: Vec<ChatMessage>,
}

impl ChatTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.entries.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.entries.push(ChatMessage::assistant(content));
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
