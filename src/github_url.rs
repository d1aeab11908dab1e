//! GitHub URL parsing.
//!
//! The pattern is anchored at the start of the input only. Anything after
//! the second path segment is ignored, and the segments themselves are
//! taken verbatim: `.git` suffixes and query strings are not stripped.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::RepositoryReference;

static GITHUB_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://github\.com/([^/]+)/([^/]+)").expect("static regex is valid")
});

/// Extract `(owner, repo)` from a GitHub URL, or `(None, None)` on no match.
pub fn parse_github_url(url: &str) -> (Option<String>, Option<String>) {
    match GITHUB_URL.captures(url) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str().to_string()),
            caps.get(2).map(|m| m.as_str().to_string()),
        ),
        None => (None, None),
    }
}

/// True iff both components are present and non-empty.
pub fn validate_owner_repo(owner: Option<&str>, repo: Option<&str>) -> bool {
    matches!((owner, repo), (Some(o), Some(r)) if !o.is_empty() && !r.is_empty())
}

impl RepositoryReference {
    /// Parse and validate in one step. `None` means the input must not be fetched.
    pub fn from_url(url: &str) -> Option<Self> {
        let (owner, name) = parse_github_url(url);
        if !validate_owner_repo(owner.as_deref(), name.as_deref()) {
            return None;
        }
        Some(Self {
            owner: owner?,
            name: name?,
        })
    }
}
