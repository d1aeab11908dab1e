//! GitHub repository connector.
//!
//! Loads the files of one branch of a repository through the GitHub REST
//! API and turns each file whose extension is on the allow-list into a
//! [`Document`].
//!
//! Workflow:
//! 1. Resolve the branch to its root tree SHA (`/branches/{branch}`).
//! 2. List the tree recursively (`/git/trees/{sha}?recursive=1`).
//! 3. Keep blobs whose extension is allowed.
//! 4. Fetch the blobs with bounded concurrency (`/git/blobs/{sha}`).
//!
//! [`load_with_branch_fallback`] wraps a [`RepositoryFetcher`] with the
//! primary/fallback branch policy.

use async_trait::async_trait;
use base64::Engine;
use futures_util::{stream, StreamExt, TryStreamExt};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::models::{Document, RepositoryReference};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("branch '{branch}' not found")]
    BranchNotFound { branch: String },

    #[error("GitHub rejected the credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("GitHub API rate limit exhausted")]
    RateLimited,

    #[error("GitHub API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid GitHub API URL: {0}")]
    InvalidUrl(String),

    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },
}

/// Anything that can produce the documents of one branch of a repository.
#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    async fn load_documents(
        &self,
        repo: &RepositoryReference,
        branch: &str,
    ) -> Result<Vec<Document>, FetchError>;
}

/// Documents together with the branch they were actually loaded from.
#[derive(Debug, Clone)]
pub struct FetchedRepository {
    pub branch: String,
    pub documents: Vec<Document>,
}

/// Load `primary`, retrying exactly once against `fallback` when the
/// primary branch does not exist. Every other failure propagates as-is.
pub async fn load_with_branch_fallback(
    fetcher: &dyn RepositoryFetcher,
    repo: &RepositoryReference,
    primary: &str,
    fallback: &str,
) -> Result<FetchedRepository, FetchError> {
    match fetcher.load_documents(repo, primary).await {
        Ok(documents) => Ok(FetchedRepository {
            branch: primary.to_string(),
            documents,
        }),
        Err(FetchError::BranchNotFound { .. }) => {
            tracing::info!(%repo, primary, fallback, "primary branch missing, trying fallback");
            let documents = fetcher.load_documents(repo, fallback).await?;
            Ok(FetchedRepository {
                branch: fallback.to_string(),
                documents,
            })
        }
        Err(e) => Err(e),
    }
}

/// True when `path` ends in one of `extensions` (each written with its dot, e.g. `".py"`).
pub fn matches_extension(path: &str, extensions: &[String]) -> bool {
    let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|allowed| allowed.strip_prefix('.').unwrap_or(allowed) == ext)
}

// ============ GitHub REST client ============

#[derive(Deserialize)]
struct BranchResponse {
    commit: BranchCommit,
}

#[derive(Deserialize)]
struct BranchCommit {
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    tree: ObjectRef,
}

#[derive(Deserialize)]
struct ObjectRef {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize, Debug, Clone)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

/// [`RepositoryFetcher`] backed by the GitHub REST API.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    include_extensions: Vec<String>,
    concurrent_requests: usize,
}

impl GithubClient {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.github.timeout_secs))
            .user_agent(concat!("repochat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base: config.github.api_base.clone(),
            token: config.credentials.github_token.clone(),
            include_extensions: config.github.include_extensions.clone(),
            concurrent_requests: config.github.concurrent_requests.max(1),
        })
    }

    fn api_url(&self, repo: &RepositoryReference, rest: &[&str]) -> Result<Url, FetchError> {
        let mut url =
            Url::parse(&self.api_base).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl(self.api_base.clone()))?
            .pop_if_empty()
            .extend(["repos", repo.owner.as_str(), repo.name.as_str()])
            .extend(rest);
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, FetchError> {
        tracing::debug!(%url, "GitHub API request");
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await?;
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let response = self.get(url).await?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn resolve_tree_sha(
        &self,
        repo: &RepositoryReference,
        branch: &str,
    ) -> Result<String, FetchError> {
        let url = self.api_url(repo, &["branches", branch])?;
        let response = self.get(url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::BranchNotFound {
                branch: branch.to_string(),
            });
        }
        let response = check_status(response).await?;
        let parsed: BranchResponse = response.json().await?;
        Ok(parsed.commit.commit.tree.sha)
    }

    async fn fetch_document(
        &self,
        repo: &RepositoryReference,
        branch: &str,
        entry: TreeEntry,
    ) -> Result<Option<Document>, FetchError> {
        let url = self.api_url(repo, &["git", "blobs", entry.sha.as_str()])?;
        let blob: BlobResponse = self.get_json(url).await?;

        let content = match decode_blob(&entry.path, &blob.content, &blob.encoding) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %entry.path, error = %e, "skipping file");
                return Ok(None);
            }
        };

        let file_name = Path::new(&entry.path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| entry.path.clone());

        Ok(Some(
            Document::new(content)
                .with_metadata("file_path", entry.path.as_str())
                .with_metadata("file_name", file_name)
                .with_metadata(
                    "url",
                    format!(
                        "https://github.com/{}/{}/blob/{}/{}",
                        repo.owner, repo.name, branch, entry.path
                    ),
                )
                .with_metadata("branch", branch),
        ))
    }
}

#[async_trait]
impl RepositoryFetcher for GithubClient {
    async fn load_documents(
        &self,
        repo: &RepositoryReference,
        branch: &str,
    ) -> Result<Vec<Document>, FetchError> {
        let tree_sha = self.resolve_tree_sha(repo, branch).await?;

        let mut url = self.api_url(repo, &["git", "trees", tree_sha.as_str()])?;
        url.query_pairs_mut().append_pair("recursive", "1");
        let tree: TreeResponse = self.get_json(url).await?;
        if tree.truncated {
            tracing::warn!(
                %repo,
                branch,
                "GitHub truncated the tree listing; some files are missing"
            );
        }

        let entries: Vec<TreeEntry> = tree
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob" && matches_extension(&e.path, &self.include_extensions))
            .collect();
        tracing::info!(%repo, branch, files = entries.len(), "fetching matching files");

        let documents: Vec<Option<Document>> = stream::iter(entries)
            .map(|entry| self.fetch_document(repo, branch, entry))
            .buffered(self.concurrent_requests)
            .try_collect()
            .await?;

        Ok(documents.into_iter().flatten().collect())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let rate_limit_exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "0");

    match status {
        StatusCode::UNAUTHORIZED => Err(FetchError::Unauthorized {
            status: status.as_u16(),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited),
        StatusCode::FORBIDDEN if rate_limit_exhausted => Err(FetchError::RateLimited),
        StatusCode::FORBIDDEN => Err(FetchError::Unauthorized {
            status: status.as_u16(),
        }),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn decode_blob(path: &str, content: &str, encoding: &str) -> Result<String, FetchError> {
    let bytes = match encoding {
        "base64" => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map_err(|e| FetchError::Decode {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?
        }
        "utf-8" | "utf8" => content.as_bytes().to_vec(),
        other => {
            return Err(FetchError::Decode {
                path: path.to_string(),
                reason: format!("unsupported encoding '{}'", other),
            })
        }
    };

    String::from_utf8(bytes).map_err(|_| FetchError::Decode {
        path: path.to_string(),
        reason: "not valid UTF-8".to_string(),
    })
}
