//! Error types shared by the resolver, the download coordinator, the model
//! store and the chat session.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single catalog backend.
///
/// These never abort a resolution on their own: the resolver logs them,
/// leaves the backend's results out of the merge and reports them back in
/// [`crate::resolver::SearchOutcome::failures`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("backend '{backend}' is unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("backend '{backend}' timed out after {after:?}")]
    Timeout { backend: String, after: Duration },
}

impl BackendError {
    pub fn unavailable(backend: impl Into<String>, reason: impl ToString) -> Self {
        BackendError::Unavailable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    pub fn backend(&self) -> &str {
        match self {
            BackendError::Unavailable { backend, .. } | BackendError::Timeout { backend, .. } => backend,
        }
    }
}

/// Errors surfaced by the core to its caller.
#[derive(Debug, Error)]
pub enum PalError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("no model found for '{query}'")]
    NotFound { query: String },

    #[error("download of {url} failed after {attempts} attempt(s): {reason} (partial data kept at {})", partial.display())]
    DownloadFailed {
        url: String,
        attempts: u32,
        reason: String,
        partial: PathBuf,
    },

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("could not activate {}: {source}", path.display())]
    ActivationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("chat session is busy ({0}); wait for the reply or cancel it first")]
    SessionBusy(String),

    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PalError>;
