use std::collections::HashMap;

use tracing::warn;

use super::types::QuantTag;
use crate::config::AliasConfig;

/// Short names shipped with the binary.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("phi3", "bartowski/Phi-3.5-mini-instruct-GGUF"),
    ("phi-3", "bartowski/Phi-3.5-mini-instruct-GGUF"),
    ("phi3.5", "bartowski/Phi-3.5-mini-instruct-GGUF"),
    ("qwen", "bartowski/Qwen2.5-7B-Instruct-GGUF"),
    ("qwen2.5", "bartowski/Qwen2.5-7B-Instruct-GGUF"),
    ("llama3", "bartowski/Llama-3.1-8B-Instruct-GGUF"),
    ("llama-3", "bartowski/Llama-3.1-8B-Instruct-GGUF"),
    ("llama3.1", "bartowski/Llama-3.1-8B-Instruct-GGUF"),
    ("codestral", "bartowski/Codestral-22B-v0.1-GGUF"),
    ("mistral", "bartowski/Mistral-7B-Instruct-v0.3-GGUF"),
];

/// Maps a short name to a canonical repository identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasEntry {
    pub alias: String,
    pub repo_id: String,
    pub quantization: Option<QuantTag>,
    pub filename: Option<String>,
}

impl AliasEntry {
    pub fn new(alias: &str, repo_id: &str) -> Self {
        AliasEntry {
            alias: alias.to_lowercase(),
            repo_id: repo_id.to_string(),
            quantization: None,
            filename: None,
        }
    }

    pub fn with_quantization(mut self, quant: QuantTag) -> Self {
        self.quantization = Some(quant);
        self
    }

    /// A canonical identifier without a namespace is itself ambiguous.
    pub fn is_exact(&self) -> bool {
        self.repo_id.contains('/')
    }

    /// File name of the artifact this alias points at.
    ///
    /// Uses the explicit file name when configured, otherwise the
    /// `<repo name without -GGUF>-<QUANT>.gguf` layout of the GGUF publishers.
    pub fn artifact_filename(&self, quant: &QuantTag) -> String {
        if let Some(filename) = &self.filename {
            return filename.clone();
        }
        let repo_name = self.repo_id.rsplit('/').next().unwrap_or(&self.repo_id);
        let base = if repo_name.to_lowercase().ends_with("-gguf") {
            &repo_name[..repo_name.len() - "-gguf".len()]
        } else {
            repo_name
        };
        format!("{}-{}.gguf", base, quant)
    }
}

/// Read-only alias lookup, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: HashMap<String, AliasEntry>,
}

impl AliasTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let entries = BUILTIN_ALIASES
            .iter()
            .map(|(alias, repo)| (alias.to_string(), AliasEntry::new(alias, repo)))
            .collect();
        AliasTable { entries }
    }

    /// Built-in aliases overlaid with the ones from configuration.
    pub fn with_configured(configured: &[AliasConfig]) -> Self {
        let mut table = Self::builtin();
        for entry in configured {
            let quantization = match entry.quantization.as_deref() {
                Some(raw) => match QuantTag::parse(raw) {
                    Some(tag) => Some(tag),
                    None => {
                        warn!("Ignoring unknown quantization '{}' for alias '{}'", raw, entry.alias);
                        None
                    }
                },
                None => None,
            };
            table.insert(AliasEntry {
                alias: entry.alias.to_lowercase(),
                repo_id: entry.repo.clone(),
                quantization,
                filename: entry.file.clone(),
            });
        }
        table
    }

    pub fn insert(&mut self, entry: AliasEntry) {
        self.entries.insert(entry.alias.to_lowercase(), entry);
    }

    /// Exact, case-insensitive lookup.
    pub fn lookup(&self, query: &str) -> Option<&AliasEntry> {
        self.entries.get(&query.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
