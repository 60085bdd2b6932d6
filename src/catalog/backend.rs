use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::huggingface::HuggingFaceBackend;
use super::types::ModelCandidate;
use crate::config::{BackendKind, Settings};
use crate::error::{self, BackendError};

/// A remote model catalog.
///
/// Implementations must be safe to query concurrently with other backends;
/// the resolver runs one task per enabled backend.
#[async_trait]
pub trait CatalogBackend: Send + Sync {
    /// Name used in candidates, logs and failure reports.
    fn name(&self) -> &str;

    /// Free-text search. `limit` bounds the number of repositories examined.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ModelCandidate>, BackendError>;

    /// Resolves `namespace/repo` or `namespace/repo/file.gguf` without searching.
    /// An unknown repository yields an empty list, not an error.
    async fn resolve_exact(&self, identifier: &str) -> Result<Vec<ModelCandidate>, BackendError>;

    /// Direct download reference for a file. Never touches the network.
    fn download_url(&self, repo_id: &str, filename: &str) -> String;
}

/// Instantiates the enabled backends from configuration.
pub fn build_backends(settings: &Settings) -> error::Result<Vec<Arc<dyn CatalogBackend>>> {
    let timeout = Duration::from_millis(settings.resolver.backend_timeout_ms);
    settings
        .enabled_backends()
        .map(|config| {
            info!("Registering catalog backend '{}' ({:?})", config.name, config.kind);
            match config.kind {
                BackendKind::HuggingFace => {
                    Ok(Arc::new(HuggingFaceBackend::new(config, timeout)?) as Arc<dyn CatalogBackend>)
                }
            }
        })
        .collect()
}
