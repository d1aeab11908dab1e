//! Generation model abstraction and the OpenAI chat-completions client.

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::models::{ChatMessage, Role};
use crate::openai::OpenAIClient;

/// A model that produces the next assistant message for a conversation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// [`ChatModel`] backed by `POST /chat/completions`.
///
/// When a system prompt is configured it is sent ahead of every
/// conversation unless the caller already supplied a system message.
pub struct OpenAIChatModel {
    client: OpenAIClient,
    model: String,
    temperature: f32,
    system_prompt: Option<String>,
}

impl OpenAIChatModel {
    pub fn new(
        client: OpenAIClient,
        model: impl Into<String>,
        temperature: f32,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
            system_prompt: system_prompt.filter(|p| !p.trim().is_empty()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            OpenAIClient::for_generation(config)?,
            config.generation.model.clone(),
            config.generation.temperature,
            config.generation.system_prompt.clone(),
        ))
    }

    fn request_messages(&self, messages: &[ChatMessage]) -> Vec<serde_json::Value> {
        let has_system = messages.iter().any(|m| m.role == Role::System);
        let prefix = match (&self.system_prompt, has_system) {
            (Some(prompt), false) => Some(ChatMessage::system(prompt.clone())),
            _ => None,
        };

        prefix
            .iter()
            .chain(messages.iter())
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect()
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": self.request_messages(messages),
        });
        let json = self.client.post_json("/chat/completions", &body).await?;
        parse_completion(&json)
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content")
        })
}
