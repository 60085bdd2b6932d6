use chrono::{serde::ts_seconds, DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A model file present in the models directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalModel {
    /// Full path of the model file
    pub path: PathBuf,
    /// File stem, e.g. `Phi-3.5-mini-instruct-Q4_K_M`
    pub name: String,
    /// Size on disk in bytes
    pub size_bytes: u64,
    /// SHA-256 when it was verified at download time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Last modification time of the file
    #[serde(with = "ts_seconds")]
    pub modified_at: DateTime<Utc>,
    /// Whether the active designator points at this file
    pub is_active: bool,
}

impl LocalModel {
    /// Reads file metadata for `path`. The model starts out inactive.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let modified_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(LocalModel {
            path: path.to_path_buf(),
            name,
            size_bytes: meta.len(),
            checksum: None,
            modified_at,
            is_active: false,
        })
    }

    pub fn with_checksum(mut self, checksum: Option<String>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn size_gb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}
