//! # Repo Chat
//!
//! Retrieval-augmented question answering over a GitHub repository.
//!
//! A repository URL is parsed into an owner/name reference, the
//! repository's source files are fetched through the GitHub REST API
//! (falling back from `main` to `master`), chunked, embedded, and written to
//! a local vector store. Questions are answered by retrieving the most
//! similar chunks and asking a chat model, either one-shot or as a
//! multi-turn conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ github_url │──▶│ connector_   │──▶│    index     │
//! │  (parse)   │   │   github     │   │ chunk+embed  │
//! └────────────┘   └──────────────┘   └──────┬───────┘
//!                                            ▼
//!                                     ┌──────────────┐
//!                                     │ store/SQLite │
//!                                     └──────┬───────┘
//!                                            ▼
//!                                  ┌───────────────────┐
//!                                  │ query / chat (llm)│
//!                                  └─────────┬─────────┘
//!                         ┌──────────────────┼─────────────┐
//!                         ▼                  ▼             ▼
//!                    ┌─────────┐       ┌──────────┐  ┌───────────┐
//!                    │ console │       │ web form │  │ chat API  │
//!                    └─────────┘       └──────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment credentials and TOML tunables |
//! | [`models`] | Core data types |
//! | [`github_url`] | GitHub URL parsing and validation |
//! | [`connector_github`] | GitHub REST fetcher with branch fallback |
//! | [`chunk`] | Text chunking |
//! | [`openai`] | OpenAI HTTP client with retry |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat model abstraction |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Vector store backends |
//! | [`index`] | Index builder |
//! | [`query`] | One-shot question answering |
//! | [`chat`] | Multi-turn chat |
//! | [`frontend`] | Front-end abstraction (console, scripted) |
//! | [`session`] | Orchestration shared by all front ends |
//! | [`server`] | Web form and chat widget |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod connector_github;
pub mod db;
pub mod embedding;
pub mod frontend;
pub mod github_url;
pub mod index;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod openai;
pub mod query;
pub mod server;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;
