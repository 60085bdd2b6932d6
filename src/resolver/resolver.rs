use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::scoring::{rank, select, Constraints, ScoredCandidate, Selection};
use crate::catalog::{AliasEntry, AliasTable, CatalogBackend, ModelCandidate, QuantTag};
use crate::config::ResolverConfig;
use crate::error::{BackendError, PalError, Result};

/// Thresholds and timeouts for resolution.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub confidence_threshold: f32,
    pub min_margin: f32,
    pub max_candidates: usize,
    pub search_limit: usize,
    pub backend_timeout: Duration,
    pub overall_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        ResolverSettings {
            confidence_threshold: 0.75,
            min_margin: 0.04,
            max_candidates: 5,
            search_limit: 10,
            backend_timeout: Duration::from_secs(10),
            overall_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&ResolverConfig> for ResolverSettings {
    fn from(config: &ResolverConfig) -> Self {
        ResolverSettings {
            confidence_threshold: config.confidence_threshold,
            min_margin: config.min_margin,
            max_candidates: config.max_candidates,
            search_limit: config.search_limit,
            backend_timeout: Duration::from_millis(config.backend_timeout_ms),
            overall_timeout: Duration::from_millis(config.overall_timeout_ms),
        }
    }
}

/// A concrete file to fetch and where to put it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedArtifact {
    pub repo_id: String,
    pub filename: String,
    pub download_url: String,
    pub destination: PathBuf,
    pub expected_size: Option<u64>,
    pub sha256: Option<String>,
    pub backend: String,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    /// One candidate won with enough confidence
    Selected(ResolvedArtifact),
    /// The user has to pick; best first
    Ambiguous(Vec<ScoredCandidate>),
}

/// Full ranking plus the backends that failed to answer.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub candidates: Vec<ScoredCandidate>,
    pub failures: Vec<BackendError>,
}

#[derive(Debug, Clone)]
enum BackendCall {
    Search { query: String, limit: usize },
    Exact { identifier: String },
}

/// Turns a loose query or alias into a ranked, concrete artifact.
pub struct Resolver {
    aliases: AliasTable,
    backends: Vec<Arc<dyn CatalogBackend>>,
    settings: ResolverSettings,
    models_dir: PathBuf,
}

impl Resolver {
    pub fn new(
        aliases: AliasTable,
        backends: Vec<Arc<dyn CatalogBackend>>,
        settings: ResolverSettings,
        models_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            aliases,
            backends,
            settings,
            models_dir: models_dir.into(),
        }
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Resolves `query` to a single artifact or a disambiguation list.
    pub async fn resolve(&self, query: &str, constraints: &Constraints) -> Result<Resolution> {
        let query = validate(query)?;

        let (query, constraints) = match self.aliases.lookup(query) {
            Some(entry) if entry.is_exact() => {
                let artifact = self.artifact_for_alias(entry, constraints)?;
                info!(
                    "Alias '{}' resolved to {}/{} without a catalog lookup",
                    entry.alias, artifact.repo_id, artifact.filename
                );
                return Ok(Resolution::Selected(artifact));
            }
            Some(entry) => {
                debug!("Alias '{}' names '{}', searching for it", entry.alias, entry.repo_id);
                let constraints = constraints.clone().with_quantization(entry.quantization.clone());
                (entry.repo_id.clone(), constraints)
            }
            None => (query.to_string(), constraints.clone()),
        };

        if is_qualified(&query) {
            let (hits, failures) = self
                .fan_out(BackendCall::Exact {
                    identifier: query.clone(),
                })
                .await;
            log_failures(&failures);
            if let Some(top) = rank(&query, hits, &constraints).into_iter().next() {
                info!("Exact identifier '{}' resolved to {}", query, top.candidate.model_id());
                return Ok(Resolution::Selected(self.artifact_for(&top.candidate)?));
            }
            debug!("No exact match for '{}', falling back to search", query);
        }

        let outcome = self.search_text(&query, &constraints).await;
        let settings = &self.settings;
        match select(
            outcome.candidates,
            settings.confidence_threshold,
            settings.min_margin,
            settings.max_candidates,
        ) {
            Some(Selection::Confident(top)) => {
                info!(
                    "Auto-selected {} (score {:.3}) for '{}'",
                    top.candidate.model_id(),
                    top.score,
                    query
                );
                Ok(Resolution::Selected(self.artifact_for(&top.candidate)?))
            }
            Some(Selection::Ambiguous(list)) => {
                info!("'{}' is ambiguous, offering {} candidates", query, list.len());
                Ok(Resolution::Ambiguous(list))
            }
            None => Err(PalError::NotFound { query }),
        }
    }

    /// Ranked candidates for `query` without the auto-selection step.
    pub async fn search(&self, query: &str, constraints: &Constraints) -> Result<SearchOutcome> {
        let query = validate(query)?;
        let (query, constraints) = match self.aliases.lookup(query) {
            Some(entry) => (
                entry.repo_id.clone(),
                constraints.clone().with_quantization(entry.quantization.clone()),
            ),
            None => (query.to_string(), constraints.clone()),
        };

        let mut outcome = if is_qualified(&query) {
            let (hits, failures) = self
                .fan_out(BackendCall::Exact {
                    identifier: query.clone(),
                })
                .await;
            SearchOutcome {
                candidates: rank(&query, hits, &constraints),
                failures,
            }
        } else {
            SearchOutcome::default()
        };

        if outcome.candidates.is_empty() {
            let mut searched = self.search_text(&query, &constraints).await;
            searched.failures.extend(outcome.failures);
            outcome = searched;
        } else {
            log_failures(&outcome.failures);
        }

        if outcome.candidates.is_empty() {
            return Err(PalError::NotFound { query });
        }
        Ok(outcome)
    }

    /// Builds the artifact descriptor for a candidate the user picked.
    pub fn artifact_for(&self, candidate: &ModelCandidate) -> Result<ResolvedArtifact> {
        let backend = self.backend_named(&candidate.backend).ok_or_else(|| PalError::NotFound {
            query: candidate.model_id(),
        })?;
        Ok(ResolvedArtifact {
            repo_id: candidate.repo_id.clone(),
            filename: candidate.filename.clone(),
            download_url: backend.download_url(&candidate.repo_id, &candidate.filename),
            destination: destination_for(&self.models_dir, &candidate.filename),
            expected_size: candidate.size_bytes,
            sha256: candidate.sha256.clone(),
            backend: backend.name().to_string(),
        })
    }

    fn artifact_for_alias(&self, entry: &AliasEntry, constraints: &Constraints) -> Result<ResolvedArtifact> {
        let backend = self.backends.first().ok_or_else(|| PalError::NotFound {
            query: entry.alias.clone(),
        })?;
        let quant = entry
            .quantization
            .clone()
            .or_else(|| constraints.quantization.clone())
            .unwrap_or_else(QuantTag::fallback);
        let filename = entry.artifact_filename(&quant);
        Ok(ResolvedArtifact {
            repo_id: entry.repo_id.clone(),
            download_url: backend.download_url(&entry.repo_id, &filename),
            destination: destination_for(&self.models_dir, &filename),
            filename,
            expected_size: None,
            sha256: None,
            backend: backend.name().to_string(),
        })
    }

    fn backend_named(&self, name: &str) -> Option<&Arc<dyn CatalogBackend>> {
        self.backends.iter().find(|b| b.name() == name)
    }

    async fn search_text(&self, query: &str, constraints: &Constraints) -> SearchOutcome {
        let (found, failures) = self
            .fan_out(BackendCall::Search {
                query: query.to_string(),
                limit: self.settings.search_limit,
            })
            .await;
        log_failures(&failures);
        debug!("Search '{}' returned {} raw candidates", query, found.len());
        SearchOutcome {
            candidates: rank(query, found, constraints),
            failures,
        }
    }

    /// Runs `call` on every backend concurrently. Each backend gets its own
    /// timeout; whatever is still running at the overall deadline is aborted
    /// and reported as timed out.
    async fn fan_out(&self, call: BackendCall) -> (Vec<ModelCandidate>, Vec<BackendError>) {
        let per_backend = self.settings.backend_timeout;
        let deadline = Instant::now() + self.settings.overall_timeout;
        let mut tasks = JoinSet::new();

        for (idx, backend) in self.backends.iter().enumerate() {
            let backend = Arc::clone(backend);
            let call = call.clone();
            tasks.spawn(async move {
                let name = backend.name().to_string();
                let request = async {
                    match &call {
                        BackendCall::Search { query, limit } => backend.search(query, *limit).await,
                        BackendCall::Exact { identifier } => backend.resolve_exact(identifier).await,
                    }
                };
                let result = match tokio::time::timeout(per_backend, request).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout {
                        backend: name,
                        after: per_backend,
                    }),
                };
                (idx, result)
            });
        }

        let mut pending: HashSet<usize> = (0..self.backends.len()).collect();
        let mut candidates = Vec::new();
        let mut failures = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((idx, result)))) => {
                    pending.remove(&idx);
                    match result {
                        Ok(found) => candidates.extend(found),
                        Err(e) => failures.push(e),
                    }
                }
                Ok(Some(Err(e))) => warn!("Catalog task ended abnormally: {}", e),
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    for idx in pending.drain() {
                        failures.push(BackendError::Timeout {
                            backend: self.backends[idx].name().to_string(),
                            after: self.settings.overall_timeout,
                        });
                    }
                    break;
                }
            }
        }

        // Tasks that panicked never reported back
        for idx in pending {
            failures.push(BackendError::unavailable(
                self.backends[idx].name(),
                "backend task aborted",
            ));
        }

        (candidates, failures)
    }
}

fn validate(query: &str) -> Result<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(PalError::InvalidQuery("query must not be empty".to_string()));
    }
    Ok(query)
}

fn is_qualified(query: &str) -> bool {
    query.contains('/')
}

fn destination_for(models_dir: &Path, filename: &str) -> PathBuf {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    models_dir.join(name)
}

fn log_failures(failures: &[BackendError]) {
    for failure in failures {
        warn!("Catalog backend excluded from results: {}", failure);
    }
}
