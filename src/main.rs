//! # Repo Chat CLI (`repochat`)
//!
//! Ask natural-language questions about a GitHub repository. The binary
//! ingests the repository into a local vector store, then answers questions
//! about it in the terminal or through a small web front end.
//!
//! ## Usage
//!
//! ```bash
//! repochat --config ./config/repochat.toml [command]
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repochat` / `repochat console` | Interactive terminal session |
//! | `repochat serve` | Web form and chat widget on `[server].bind` |
//!
//! ## Environment
//!
//! `OPENAI_API_KEY`, `GITHUB_TOKEN`, `ACTIVELOOP_TOKEN`, and `DATASET_PATH`
//! must be set (a `.env` file in the working directory is honoured).
//! `RUST_LOG` controls diagnostic output on stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use repo_chat::config;
use repo_chat::frontend::ConsoleFrontEnd;
use repo_chat::server;
use repo_chat::session::{self, Services};

/// Repo Chat: retrieval-augmented question answering over a GitHub repository.
#[derive(Parser)]
#[command(
    name = "repochat",
    about = "Ask natural-language questions about a GitHub repository",
    version
)]
struct Cli {
    /// Path to the tunables file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "./config/repochat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive terminal session (the default).
    Console,

    /// Serve the web form (`/`) and chat widget (`/chat`).
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Credentials are checked before any network activity.
    let cfg = Arc::new(config::load_config(&cli.config)?);
    let services = Services::from_config(cfg).await?;

    match cli.command.unwrap_or(Commands::Console) {
        Commands::Console => {
            let mut console = ConsoleFrontEnd::stdio();
            session::run_interactive(&mut console, &services).await?;
        }
        Commands::Serve => {
            server::run_server(services).await?;
        }
    }

    Ok(())
}
