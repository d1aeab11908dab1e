//! Ingest-and-ask orchestration shared by every front end.
//!
//! ```text
//! prompt URL ──▶ parse/validate ──▶ fetch (main → master) ──▶ build index
//!                     │ invalid                                    │
//!                     └── warn, re-prompt                          ▼
//!                                             intro question ──▶ question loop ("exit" ends)
//! ```
//!
//! [`Services`] bundles the external collaborators built once from the
//! configuration; [`Session`] owns everything tied to one ingested
//! repository (the index handle and the chat transcript) and is dropped
//! when the conversation ends.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::chat::ChatEngine;
use crate::config::Config;
use crate::connector_github::{load_with_branch_fallback, GithubClient, RepositoryFetcher};
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::frontend::FrontEnd;
use crate::index::{IndexBuilder, VectorIndex};
use crate::llm::{ChatModel, OpenAIChatModel};
use crate::models::{ChatTranscript, RepositoryReference};
use crate::query::{QueryEngine, QueryResponse};
use crate::store::{SqliteVectorStore, VectorStore};

pub const URL_PROMPT: &str = "Please enter the GitHub repository URL: ";
pub const QUESTION_PROMPT: &str = "Please enter your question (or type 'exit' to quit): ";
pub const INVALID_URL_WARNING: &str = "Invalid GitHub URL. Please try again.";
pub const INTRO_QUESTION: &str = "What is the repository about?";
pub const FAREWELL: &str = "Exiting, thanks for chatting!";
pub const CHAT_GREETING: &str = "Ask me a question about the Github Repo!";

const RULE_WIDTH: usize = 50;

/// External collaborators, constructed once per process.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub fetcher: Arc<dyn RepositoryFetcher>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn ChatModel>,
    pub store: Arc<dyn VectorStore>,
}

impl Services {
    /// Build the GitHub, OpenAI, and SQLite-backed collaborators.
    pub async fn from_config(config: Arc<Config>) -> Result<Self> {
        let fetcher = GithubClient::new(&config).context("Failed to create GitHub client")?;
        let embedder = OpenAIEmbedder::from_config(&config)?;
        let llm = OpenAIChatModel::from_config(&config)?;
        let store = SqliteVectorStore::open(&config.dataset_path).await?;

        Ok(Self {
            config,
            fetcher: Arc::new(fetcher),
            embedder: Arc::new(embedder),
            llm: Arc::new(llm),
            store: Arc::new(store),
        })
    }
}

/// One ingested repository plus the conversation about it.
pub struct Session {
    repository: RepositoryReference,
    branch: String,
    index: VectorIndex,
    query_engine: QueryEngine,
    chat_engine: ChatEngine,
}

impl Session {
    /// Fetch `repository` (with branch fallback), report what was loaded,
    /// and build a fresh index over it.
    pub async fn ingest(
        services: &Services,
        repository: RepositoryReference,
        frontend: &mut dyn FrontEnd,
    ) -> Result<Self> {
        let config = &services.config;

        frontend.display_progress(&format!(
            "Loading {} repository by {}",
            repository.name, repository.owner
        ));
        let fetched = load_with_branch_fallback(
            services.fetcher.as_ref(),
            &repository,
            &config.github.primary_branch,
            &config.github.fallback_branch,
        )
        .await
        .with_context(|| format!("Failed to load repository {}", repository))?;

        frontend.display_text("Documents uploaded:");
        for doc in &fetched.documents {
            frontend.display_text(&doc.metadata_line());
        }

        frontend.display_progress("Uploading to vector store...");
        let builder =
            IndexBuilder::from_config(config, services.embedder.clone(), services.store.clone());
        let index = builder.build(&fetched.documents).await?;
        tracing::info!(
            %repository,
            branch = %fetched.branch,
            documents = index.document_count(),
            chunks = index.chunk_count(),
            "repository indexed"
        );

        let top_k = config.retrieval.similarity_top_k;
        Ok(Self {
            query_engine: index.as_query_engine(services.llm.clone(), top_k),
            chat_engine: index.as_chat_engine(services.llm.clone(), top_k),
            repository,
            branch: fetched.branch,
            index,
        })
    }

    pub fn repository(&self) -> &RepositoryReference {
        &self.repository
    }

    /// Branch the documents were actually loaded from.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn document_count(&self) -> usize {
        self.index.document_count()
    }

    /// Id of the store build this session answers from.
    pub fn index_id(&self) -> &str {
        self.index.index_id()
    }

    /// One-shot question; does not touch the transcript.
    pub async fn query(&self, question: &str) -> Result<QueryResponse> {
        self.query_engine.query(question).await
    }

    /// Multi-turn question; recorded in the transcript.
    pub async fn chat(&mut self, message: &str) -> Result<String> {
        self.chat_engine.chat(message).await
    }

    pub fn transcript(&self) -> &ChatTranscript {
        self.chat_engine.transcript()
    }
}

/// The literal `exit`, in any letter case.
pub fn is_exit_command(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit")
}

pub fn format_answer(answer: &str, width: usize) -> String {
    format!("Answer: {}\n", textwrap::fill(answer, width))
}

/// Prompt until a valid repository URL is entered.
///
/// Returns `None` when the front end runs out of input, in which case
/// nothing must be fetched.
pub async fn prompt_for_repository(
    frontend: &mut dyn FrontEnd,
) -> Result<Option<RepositoryReference>> {
    loop {
        let Some(url) = frontend.prompt_text(URL_PROMPT).await? else {
            return Ok(None);
        };
        match RepositoryReference::from_url(&url) {
            Some(repo) => return Ok(Some(repo)),
            None => frontend.display_warning(INVALID_URL_WARNING),
        }
    }
}

/// Ask the intro question, then answer questions until `exit` or end of input.
pub async fn answer_questions(
    frontend: &mut dyn FrontEnd,
    session: &Session,
    wrap_width: usize,
) -> Result<()> {
    let rule = "=".repeat(RULE_WIDTH);

    frontend.display_text(&format!("Test question: {}", INTRO_QUESTION));
    frontend.display_text(&rule);
    let answer = session.query(INTRO_QUESTION).await?;
    frontend.display_text(&format_answer(&answer.response, wrap_width));

    while let Some(question) = frontend.prompt_text(QUESTION_PROMPT).await? {
        if is_exit_command(&question) {
            frontend.display_text(FAREWELL);
            break;
        }

        frontend.display_text(&format!("Your question: {}", question));
        frontend.display_text(&rule);
        let answer = session.query(&question).await?;
        frontend.display_text(&format_answer(&answer.response, wrap_width));
    }

    Ok(())
}

/// The whole interactive flow: URL → ingest → intro question → question loop.
///
/// Returns the session so callers may keep using it, or `None` when no
/// valid URL was supplied.
pub async fn run_interactive(
    frontend: &mut dyn FrontEnd,
    services: &Services,
) -> Result<Option<Session>> {
    let Some(repository) = prompt_for_repository(frontend).await? else {
        return Ok(None);
    };
    let session = Session::ingest(services, repository, frontend).await?;
    answer_questions(frontend, &session, services.config.display.wrap_width).await?;
    Ok(Some(session))
}
