//! Startup configuration.
//!
//! Configuration is resolved exactly once, in [`load_config`], and the
//! resulting [`Config`] is passed by reference (or `Arc`) into every stage.
//! Two inputs are combined:
//!
//! - **Credentials and the dataset location** come from the environment
//!   (optionally seeded from a `.env` file). All four are required and a
//!   missing value aborts startup before any network activity.
//! - **Tunables** (models, chunk sizes, branch names, bind address) come
//!   from an optional TOML file. Every key has a default, so the file may
//!   be absent.
//!
//! ```toml
//! [generation]
//! model = "gpt-3.5-turbo"
//! temperature = 0.5
//!
//! [github]
//! include_extensions = [".py", ".js", ".ts", ".md"]
//! concurrent_requests = 5
//!
//! [retrieval]
//! similarity_top_k = 2
//! ```

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding the generation/embedding credential.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Environment variable holding the repository-fetch credential.
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
/// Environment variable holding the vector-store credential.
pub const ENV_ACTIVELOOP_TOKEN: &str = "ACTIVELOOP_TOKEN";
/// Environment variable holding the vector-store location.
pub const ENV_DATASET_PATH: &str = "DATASET_PATH";

const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert in Python and github libraries. \
You can understand code and your job is to answer technical questions. \
Assume that all questions are related to the repository information provided. \
Keep your answers technical and based on facts - do not hallucinate features.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{what} not found in environment variables (set {var})")]
    MissingEnv {
        var: &'static str,
        what: &'static str,
    },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Secrets read from the environment.
///
/// `Debug` output never includes the secret values.
#[derive(Clone)]
pub struct Credentials {
    pub openai_api_key: String,
    pub github_token: String,
    pub activeloop_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &"<redacted>")
            .field("github_token", &"<redacted>")
            .field("activeloop_token", &"<redacted>")
            .finish()
    }
}

/// Fully resolved, immutable application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    /// Location of the persistent vector store. Overwritten on every ingestion.
    pub dataset_path: PathBuf,
    pub generation: GenerationConfig,
    pub embedding: EmbeddingConfig,
    pub openai: OpenAIConfig,
    pub github: GithubConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
    pub display: DisplayConfig,
}

/// The TOML-file half of the configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub generation: GenerationConfig,
    pub embedding: EmbeddingConfig,
    pub openai: OpenAIConfig,
    pub github: GithubConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            temperature: default_temperature(),
            system_prompt: default_system_prompt(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_system_prompt() -> Option<String> {
    Some(DEFAULT_SYSTEM_PROMPT.to_string())
}
fn default_max_retries() -> u32 {
    5
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAIConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_api_base")]
    pub api_base: String,
    #[serde(default = "default_include_extensions")]
    pub include_extensions: Vec<String>,
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,
    #[serde(default = "default_primary_branch")]
    pub primary_branch: String,
    #[serde(default = "default_fallback_branch")]
    pub fallback_branch: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_github_api_base(),
            include_extensions: default_include_extensions(),
            concurrent_requests: default_concurrent_requests(),
            primary_branch: default_primary_branch(),
            fallback_branch: default_fallback_branch(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_include_extensions() -> Vec<String> {
    [".py", ".js", ".ts", ".md"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_concurrent_requests() -> usize {
    5
}
fn default_primary_branch() -> String {
    "main".to_string()
}
fn default_fallback_branch() -> String {
    "master".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_top_k: default_similarity_top_k(),
        }
    }
}

fn default_similarity_top_k() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_wrap_width")]
    pub wrap_width: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            wrap_width: default_wrap_width(),
        }
    }
}

fn default_wrap_width() -> usize {
    100
}

/// Load configuration from the process environment and an optional TOML file.
///
/// A `.env` file in the working directory is loaded first when present.
/// Credentials are checked before the file is read so that a missing
/// credential is always the first error reported.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    // Absent .env is fine; values may come from the real environment.
    let _ = dotenvy::dotenv();

    let lookup = |key: &str| std::env::var(key).ok();
    let (credentials, dataset_path) = resolve_environment(&lookup)?;

    let settings = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse_settings(&content)?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Settings::default()
    };

    Config::from_parts(credentials, dataset_path, settings)
}

/// Parse and validate the TOML tunables.
pub fn parse_settings(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = toml::from_str(content)?;
    Ok(settings)
}

/// Resolve the required environment values through `lookup`.
///
/// Empty values count as missing.
pub fn resolve_environment(
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(Credentials, PathBuf), ConfigError> {
    let require = |var: &'static str, what: &'static str| -> Result<String, ConfigError> {
        match lookup(var) {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(ConfigError::MissingEnv { var, what }),
        }
    };

    let openai_api_key = require(ENV_OPENAI_API_KEY, "OpenAI API key")?;
    let github_token = require(ENV_GITHUB_TOKEN, "GitHub token")?;
    let activeloop_token = require(ENV_ACTIVELOOP_TOKEN, "Activeloop token")?;
    let dataset_path = require(ENV_DATASET_PATH, "Dataset path")?;

    Ok((
        Credentials {
            openai_api_key,
            github_token,
            activeloop_token,
        },
        PathBuf::from(dataset_path),
    ))
}

impl Config {
    /// Combine credentials and tunables, validating the tunables.
    pub fn from_parts(
        credentials: Credentials,
        dataset_path: PathBuf,
        settings: Settings,
    ) -> Result<Self, ConfigError> {
        let Settings {
            generation,
            embedding,
            openai,
            github,
            chunking,
            retrieval,
            server,
            display,
        } = settings;

        if chunking.max_tokens == 0 {
            return Err(ConfigError::Invalid("chunking.max_tokens must be > 0".into()));
        }
        if retrieval.similarity_top_k < 1 {
            return Err(ConfigError::Invalid(
                "retrieval.similarity_top_k must be >= 1".into(),
            ));
        }
        if embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be > 0".into()));
        }
        if github.concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "github.concurrent_requests must be > 0".into(),
            ));
        }
        if github.include_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "github.include_extensions must not be empty".into(),
            ));
        }
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(ConfigError::Invalid(
                "generation.temperature must be in [0.0, 2.0]".into(),
            ));
        }
        if display.wrap_width == 0 {
            return Err(ConfigError::Invalid("display.wrap_width must be > 0".into()));
        }

        Ok(Self {
            credentials,
            dataset_path,
            generation,
            embedding,
            openai,
            github,
            chunking,
            retrieval,
            server,
            display,
        })
    }
}
