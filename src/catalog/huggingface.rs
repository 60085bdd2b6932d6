//! HuggingFace-style catalog: repository search plus per-repository file
//! listings, restricted to single-file GGUF artifacts.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::backend::CatalogBackend;
use super::types::{is_single_gguf, ModelCandidate};
use crate::config::BackendConfig;
use crate::error::{BackendError, Result as PalResult};

/// Repositories requested from the search API at minimum. Pattern filtering
/// happens afterwards, so asking for only `limit` would starve it.
const SEARCH_FETCH_FLOOR: usize = 20;

/// Entry of `GET /api/models?search=...`
#[derive(Debug, Deserialize)]
struct RepoSummary {
    id: String,
}

/// Entry of `GET /api/models/<repo>/tree/main`
#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    size: Option<u64>,
    lfs: Option<LfsPointer>,
}

#[derive(Debug, Deserialize)]
struct LfsPointer {
    /// SHA-256 of the stored object
    oid: String,
    size: Option<u64>,
}

pub struct HuggingFaceBackend {
    name: String,
    base_url: String,
    api_url: String,
    repo_patterns: Vec<Regex>,
    client: Client,
    timeout: Duration,
}

impl HuggingFaceBackend {
    pub fn new(config: &BackendConfig, timeout: Duration) -> PalResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("llmpal/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let repo_patterns = config
            .repo_patterns
            .iter()
            .filter_map(|pattern| match pattern_to_regex(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Ignoring repository pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect();

        Ok(Self {
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            repo_patterns,
            client,
            timeout,
        })
    }

    fn matches_pattern(&self, repo_id: &str) -> bool {
        self.repo_patterns.is_empty() || self.repo_patterns.iter().any(|re| re.is_match(repo_id))
    }

    fn map_err(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout {
                backend: self.name.clone(),
                after: self.timeout,
            }
        } else {
            BackendError::unavailable(&self.name, err)
        }
    }

    /// Lists the files of one repository. `None` when the repository does not exist.
    async fn list_files(&self, repo_id: &str) -> Result<Option<Vec<TreeEntry>>, BackendError> {
        let url = format!("{}/models/{}/tree/main", self.api_url, repo_id);
        debug!("Listing files of {}", repo_id);

        let response = self.client.get(&url).send().await.map_err(|e| self.map_err(e))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let entries = response.json::<Vec<TreeEntry>>().await.map_err(|e| self.map_err(e))?;
                Ok(Some(entries))
            }
            status => Err(BackendError::unavailable(
                &self.name,
                format!("HTTP {} listing {}", status, repo_id),
            )),
        }
    }

    fn candidates_from(&self, repo_id: &str, entries: Vec<TreeEntry>, query: &str) -> Vec<ModelCandidate> {
        entries
            .into_iter()
            .filter(|entry| entry.kind == "file" && is_single_gguf(&entry.path))
            .map(|entry| {
                let (sha256, lfs_size) = match entry.lfs {
                    Some(lfs) => (Some(lfs.oid), lfs.size),
                    None => (None, None),
                };
                ModelCandidate::from_file(
                    &self.name,
                    repo_id,
                    &entry.path,
                    lfs_size.or(entry.size),
                    sha256,
                    query,
                )
            })
            .collect()
    }
}

#[async_trait]
impl CatalogBackend for HuggingFaceBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ModelCandidate>, BackendError> {
        let url = format!("{}/models", self.api_url);
        let fetch = limit.saturating_mul(4).max(SEARCH_FETCH_FLOOR);
        let limit_param = fetch.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("search", query), ("filter", "gguf"), ("limit", limit_param.as_str())])
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        if !response.status().is_success() {
            return Err(BackendError::unavailable(
                &self.name,
                format!("HTTP {} from search", response.status()),
            ));
        }

        let repos = response.json::<Vec<RepoSummary>>().await.map_err(|e| self.map_err(e))?;
        let kept: Vec<String> = repos
            .into_iter()
            .map(|repo| repo.id)
            .filter(|id| self.matches_pattern(id))
            .take(limit)
            .collect();
        debug!("Search '{}' kept {} repositories", query, kept.len());

        let listings = join_all(kept.iter().map(|repo| self.list_files(repo))).await;

        let mut candidates = Vec::new();
        for (repo_id, listing) in kept.iter().zip(listings) {
            match listing {
                Ok(Some(entries)) => candidates.extend(self.candidates_from(repo_id, entries, query)),
                Ok(None) => debug!("Repository {} vanished between search and listing", repo_id),
                // One unreadable repository does not spoil the rest of the search
                Err(e) => debug!("Skipping {}: {}", repo_id, e),
            }
        }

        Ok(candidates)
    }

    async fn resolve_exact(&self, identifier: &str) -> Result<Vec<ModelCandidate>, BackendError> {
        let parts: Vec<&str> = identifier.trim().trim_matches('/').split('/').collect();
        if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Ok(Vec::new());
        }
        let repo_id = format!("{}/{}", parts[0], parts[1]);
        let filename = parts[2..].join("/");

        let Some(entries) = self.list_files(&repo_id).await? else {
            return Ok(Vec::new());
        };

        let mut candidates = self.candidates_from(&repo_id, entries, "");
        if !filename.is_empty() {
            candidates.retain(|c| c.filename == filename);
        }
        Ok(candidates)
    }

    fn download_url(&self, repo_id: &str, filename: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.base_url, repo_id, filename)
    }
}

/// `bartowski/*-GGUF` → `^bartowski/.*-GGUF$`, case-insensitive.
fn pattern_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?i)^{}$", body))
}
