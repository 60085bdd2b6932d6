use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::resolver::fuzzy;

/// Quantization tag embedded in a file name, e.g. `-Q4_K_M.gguf`.
static QUANT_IN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[-_.])(I?Q\d(?:_[A-Z0-9]+){1,2}|BF16|F16|F32)(?:[-_.]|$)")
        .expect("quantization pattern is valid")
});

/// A quantization tag on its own, as written in configuration.
static QUANT_EXACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(I?Q\d(?:_[A-Z0-9]+){1,2}|BF16|F16|F32)$").expect("quantization pattern is valid")
});

/// Trailing quantization suffix stripped from display names.
static QUANT_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[-_.](I?Q\d(?:_[A-Z0-9]+){1,2}|BF16|F16|F32)$").expect("quantization pattern is valid")
});

/// Split GGUF shards, e.g. `model-Q8_0-00001-of-00003.gguf`.
static SHARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)-\d{5}-of-\d{5}\.gguf$").expect("shard pattern is valid"));

static INSTRUCT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(instruct|chat|(?:^|[-_.\s])it(?:[-_.\s]|$))").expect("instruct pattern is valid")
});

/// Default quantization ordering used when no preference is configured.
const DEFAULT_ORDER: [&str; 4] = ["Q4_K_M", "Q5_K_M", "Q6_K", "Q8_0"];

/// Normalized (uppercase) quantization label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QuantTag(String);

impl QuantTag {
    /// Parses a bare tag such as `q4_k_m`.
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        QUANT_EXACT
            .is_match(tag)
            .then(|| QuantTag(tag.to_uppercase()))
    }

    /// Finds the tag embedded in a GGUF file name.
    pub fn from_filename(filename: &str) -> Option<Self> {
        QUANT_IN_NAME
            .captures(filename)
            .and_then(|caps| caps.get(1))
            .map(|m| QuantTag(m.as_str().to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Position-based bonus in the default ordering: Q4_K_M > Q5_K_M > Q6_K > Q8_0 > others.
    pub fn default_rank_bonus(&self) -> f32 {
        DEFAULT_ORDER
            .iter()
            .position(|t| *t == self.0)
            .map(|i| 1.0 - i as f32 * 0.25)
            .unwrap_or(0.0)
    }

    /// The tag used when neither the alias nor the constraints name one.
    pub fn fallback() -> Self {
        QuantTag(DEFAULT_ORDER[0].to_string())
    }
}

impl fmt::Display for QuantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns true for `.gguf` files that can be fetched as a single artifact.
pub fn is_single_gguf(filename: &str) -> bool {
    filename.to_lowercase().ends_with(".gguf") && !SHARD.is_match(filename)
}

/// Model name without the `.gguf` extension and quantization suffix.
pub fn display_name_for(filename: &str) -> String {
    let base = filename.rsplit('/').next().unwrap_or(filename);
    let stem = if base.to_lowercase().ends_with(".gguf") {
        &base[..base.len() - ".gguf".len()]
    } else {
        base
    };
    QUANT_SUFFIX.replace(stem, "").into_owned()
}

/// One downloadable file offered by a catalog backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCandidate {
    /// Repository identifier, e.g. `bartowski/Phi-3.5-mini-instruct-GGUF`
    pub repo_id: String,
    /// Human-readable model name derived from the file name
    pub display_name: String,
    /// File name inside the repository
    pub filename: String,
    /// Quantization tag parsed from the file name
    pub quantization: Option<QuantTag>,
    /// File size in bytes when the catalog reports it
    pub size_bytes: Option<u64>,
    /// SHA-256 of the file when the catalog reports it
    pub sha256: Option<String>,
    /// Name of the backend that produced the candidate
    pub backend: String,
    /// Backend-local relevance in [0, 1]
    pub relevance: f32,
}

impl ModelCandidate {
    /// Builds a candidate from catalog file metadata, scoring it against `query`.
    pub fn from_file(
        backend: &str,
        repo_id: &str,
        filename: &str,
        size_bytes: Option<u64>,
        sha256: Option<String>,
        query: &str,
    ) -> Self {
        let display_name = display_name_for(filename);
        let relevance = if query.is_empty() {
            1.0
        } else {
            fuzzy::similarity(query, &display_name)
        };
        ModelCandidate {
            repo_id: repo_id.to_string(),
            quantization: QuantTag::from_filename(filename),
            display_name,
            filename: filename.to_string(),
            size_bytes,
            sha256,
            backend: backend.to_string(),
            relevance,
        }
    }

    /// Whether the name indicates an instruction or chat tuned variant.
    pub fn is_instruct(&self) -> bool {
        INSTRUCT.is_match(&self.display_name) || INSTRUCT.is_match(&self.repo_id)
    }

    /// Copyable identifier: `<repo>/<file>`.
    pub fn model_id(&self) -> String {
        format!("{}/{}", self.repo_id, self.filename)
    }

    pub fn size_gb(&self) -> Option<f64> {
        self.size_bytes.map(|b| b as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
