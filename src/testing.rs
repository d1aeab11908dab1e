//! In-process fakes for the external collaborators, shared by unit tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::embedding::Embedder;
use crate::llm::ChatModel;
use crate::models::ChatMessage;

/// Deterministic bag-of-bytes embedding: similar texts get similar vectors.
pub struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 16];
                for b in t.bytes() {
                    v[(b % 16) as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unavailable")
    }
}

/// Chat model that replays queued responses and records every last-message prompt.
pub struct RecordingChatModel {
    responses: Mutex<VecDeque<String>>,
    default_response: String,
    fail: bool,
    prompts: Mutex<Vec<String>>,
}

impl RecordingChatModel {
    pub fn answering(response: &str) -> Self {
        Self::with_responses(Vec::new()).default_to(response)
    }

    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            default_response: "mock response".into(),
            fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with_responses(Vec::new())
        }
    }

    fn default_to(mut self, response: &str) -> Self {
        self.default_response = response.to_string();
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for RecordingChatModel {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        if self.fail {
            bail!("generation service unavailable");
        }
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.default_response.clone()))
    }
}
