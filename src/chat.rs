//! Multi-turn chat with the condense-question strategy.
//!
//! Every turn is folded together with the prior conversation into one
//! standalone question, which is then answered by a [`QueryEngine`]. The
//! conversation itself lives in a [`ChatTranscript`] owned by the engine.

use anyhow::Result;
use std::sync::Arc;

use crate::llm::ChatModel;
use crate::models::{ChatMessage, ChatTranscript};
use crate::query::QueryEngine;

pub struct ChatEngine {
    query_engine: QueryEngine,
    llm: Arc<dyn ChatModel>,
    transcript: ChatTranscript,
}

impl ChatEngine {
    pub fn new(query_engine: QueryEngine, llm: Arc<dyn ChatModel>) -> Self {
        Self {
            query_engine,
            llm,
            transcript: ChatTranscript::new(),
        }
    }

    pub fn transcript(&self) -> &ChatTranscript {
        &self.transcript
    }

    /// Answer one user message and record both sides in the transcript.
    ///
    /// The user entry is recorded before any model call, so a failed turn
    /// leaves the question in the transcript without an answer.
    pub async fn chat(&mut self, message: &str) -> Result<String> {
        let history = self.transcript.entries().to_vec();
        self.transcript.push_user(message);

        let standalone = self.condense_question(&history, message).await?;
        tracing::debug!(%standalone, "condensed question");

        let answer = self.query_engine.query(&standalone).await?;
        self.transcript.push_assistant(answer.response.clone());
        Ok(answer.response)
    }

    async fn condense_question(&self, history: &[ChatMessage], message: &str) -> Result<String> {
        if history.is_empty() {
            return Ok(message.to_string());
        }
        let prompt = condense_question_prompt(history, message);
        self.llm.complete(&[ChatMessage::user(prompt)]).await
    }
}

pub fn condense_question_prompt(history: &[ChatMessage], message: &str) -> String {
    let chat_history = history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Given a conversation (between Human and Assistant) and a follow up message from Human, \
         rewrite the message to be a standalone question that captures all relevant context \
         from the conversation.\n\n\
         <Chat History>\n{chat_history}\n\n\
         <Follow Up Message>\n{message}\n\n\
         <Standalone question>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexBuilder;
    use crate::models::{Document, Role};
    use crate::store::InMemoryVectorStore;
    use crate::testing::{FixedEmbedder, RecordingChatModel};

    async fn engine(llm: Arc<RecordingChatModel>) -> ChatEngine {
        let index = IndexBuilder::new(
            Arc::new(FixedEmbedder),
            Arc::new(InMemoryVectorStore::new()),
            1024,
            8,
        )
        .build(&[Document::new("def test_env(): pass")
            .with_metadata("file_path", "tests/test_env.py")])
        .await
        .unwrap();
        index.as_chat_engine(llm, 2)
    }

    #[tokio::test]
    async fn test_two_turns_yield_four_ordered_entries() {
        let llm = Arc::new(RecordingChatModel::with_responses(vec![
            "Python.".into(),
            "Does the repository have tests?".into(),
            "Yes, under tests/.".into(),
        ]));
        let mut chat = engine(llm.clone()).await;

        assert_eq!(chat.chat("What language is this?").await.unwrap(), "Python.");
        assert_eq!(chat.chat("Does it have tests?").await.unwrap(), "Yes, under tests/.");

        let roles: Vec<Role> = chat.transcript().entries().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(chat.transcript().entries()[2].content, "Does it have tests?");
    }

    #[tokio::test]
    async fn test_first_turn_is_not_condensed() {
        let llm = Arc::new(RecordingChatModel::answering("ok"));
        let mut chat = engine(llm.clone()).await;
        chat.chat("What language is this?").await.unwrap();

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Query: What language is this?"));
    }

    #[tokio::test]
    async fn test_follow_up_uses_condensed_question_for_retrieval() {
        let llm = Arc::new(RecordingChatModel::with_responses(vec![
            "Python.".into(),
            "Does the gym repository have tests?".into(),
            "Yes.".into(),
        ]));
        let mut chat = engine(llm.clone()).await;
        chat.chat("What language is this?").await.unwrap();
        chat.chat("Does it have tests?").await.unwrap();

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1]
            .contains("<Chat History>\nuser: What language is this?\nassistant: Python."));
        assert!(prompts[1].contains("<Follow Up Message>\nDoes it have tests?"));
        assert!(prompts[2].contains("Query: Does the gym repository have tests?"));
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_user_entry() {
        let llm = Arc::new(RecordingChatModel::failing());
        let mut chat = engine(llm).await;
        assert!(chat.chat("hello").await.is_err());
        assert_eq!(chat.transcript().len(), 1);
        assert_eq!(chat.transcript().entries()[0].role, Role::User);
    }
}
