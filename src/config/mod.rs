// Required external crates for configuration management and serialization
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Defaults compiled into the binary; every other source is optional.
const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Configuration for the local models directory and model preferences
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Directory where model files and the active designator live
    pub directory: PathBuf,
    /// Preferred quantization tag (e.g. "Q4_K_M"); falls back to the built-in ordering
    pub preferred_quantization: Option<String>,
    /// Whether instruction/chat tuned variants get a ranking bonus
    pub prefer_instruct: bool,
}

/// Tuning for candidate ranking and backend fan-out
#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    /// Minimum combined score for auto-selection (0.0-1.0)
    pub confidence_threshold: f32,
    /// Minimum lead over the runner-up for auto-selection (0.0-1.0)
    pub min_margin: f32,
    /// Number of candidates offered for disambiguation
    pub max_candidates: usize,
    /// Result-count bound passed to each backend
    pub search_limit: usize,
    /// Per-backend timeout in milliseconds
    pub backend_timeout_ms: u64,
    /// Overall deadline for the whole fan-out in milliseconds
    pub overall_timeout_ms: u64,
}

/// Known catalog backend implementations
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    HuggingFace,
}

/// One configured catalog backend
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Name reported in candidates and logs
    pub name: String,
    /// Which implementation to instantiate
    pub kind: BackendKind,
    /// Whether the backend takes part in resolution
    pub enabled: bool,
    /// Base URL used for download references
    pub base_url: String,
    /// Base URL of the read-only listing API
    pub api_url: String,
    /// Repository patterns to keep from search results (`*` wildcard)
    #[serde(default)]
    pub repo_patterns: Vec<String>,
}

/// Alias entry supplied by configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AliasConfig {
    pub alias: String,
    pub repo: String,
    pub quantization: Option<String>,
    pub file: Option<String>,
}

/// Retry policy for artifact downloads
#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    /// Total number of transfer attempts
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,
}

/// Configuration for the generation endpoint and sampling parameters
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Base URL of the OpenAI-compatible inference server
    pub base_url: String,
    /// Connect timeout in seconds
    pub timeout_secs: u64,
    /// Maximum number of tokens to generate per reply
    pub max_tokens: usize,
    /// Controls randomness in generation (0.0-2.0)
    pub temperature: f32,
    /// Nucleus sampling cutoff (0.0-1.0)
    pub top_p: f32,
    /// Token budget for the request window; unlimited when absent
    pub context_token_budget: Option<usize>,
    /// Optional system message that opens every session
    pub system_prompt: Option<String>,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Optional log directory
    pub file: Option<PathBuf>,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub models: ModelConfig,
    pub resolver: ResolverConfig,
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub aliases: Vec<AliasConfig>,
    pub download: DownloadConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Loads settings from the directory named by `LLMPAL_CONFIG_DIR`, or
    /// `./config` when unset.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables prefixed with `LLMPAL_` (`__` separates sections)
    /// 2. `local.toml` in the config directory
    /// 3. `default.toml` in the config directory
    /// 4. Built-in defaults
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = match std::env::var_os("LLMPAL_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()
                .map_err(|e| ConfigError::Message(format!("Failed to get current directory: {}", e)))?
                .join("config"),
        };
        Self::load_from(&config_dir)
    }

    /// Loads settings using `config_dir` for the optional file sources.
    pub fn load_from(config_dir: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("LLMPAL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize::<Settings>()?;

        settings.validate()?;

        Ok(settings)
    }

    /// Backends that take part in resolution, in configuration order.
    pub fn enabled_backends(&self) -> impl Iterator<Item = &BackendConfig> {
        self.backends.iter().filter(|b| b.enabled)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.models.directory.exists() {
            std::fs::create_dir_all(&self.models.directory).map_err(|e| {
                ConfigError::Message(format!(
                    "Failed to create models directory at {}: {}",
                    self.models.directory.display(),
                    e
                ))
            })?;
        }

        for (key, value) in [
            ("resolver.confidence_threshold", self.resolver.confidence_threshold),
            ("resolver.min_margin", self.resolver.min_margin),
            ("api.top_p", self.api.top_p),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Message(format!(
                    "{} must be between 0.0 and 1.0, got: {}",
                    key, value
                )));
            }
        }

        if !(0.0..=2.0).contains(&self.api.temperature) {
            return Err(ConfigError::Message(format!(
                "Temperature must be between 0.0 and 2.0, got: {}",
                self.api.temperature
            )));
        }

        if self.api.max_tokens == 0 {
            return Err(ConfigError::Message("max_tokens must be greater than 0".to_string()));
        }

        if self.api.context_token_budget == Some(0) {
            return Err(ConfigError::Message(
                "context_token_budget must be greater than 0 when set".to_string(),
            ));
        }

        if self.resolver.max_candidates == 0 || self.resolver.search_limit == 0 {
            return Err(ConfigError::Message(
                "max_candidates and search_limit must be greater than 0".to_string(),
            ));
        }

        if self.resolver.backend_timeout_ms == 0 || self.resolver.overall_timeout_ms == 0 {
            return Err(ConfigError::Message("resolver timeouts must be greater than 0".to_string()));
        }

        if self.download.max_attempts == 0 {
            return Err(ConfigError::Message("download.max_attempts must be at least 1".to_string()));
        }

        if let Some(quant) = &self.models.preferred_quantization {
            if crate::catalog::QuantTag::parse(quant).is_none() {
                return Err(ConfigError::Message(format!(
                    "Unrecognized preferred_quantization: {}",
                    quant
                )));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(format!(
                "Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                self.logging.level
            ))),
        }?;

        if let Some(log_dir) = &self.logging.file {
            if !log_dir.exists() {
                std::fs::create_dir_all(log_dir).map_err(|e| {
                    ConfigError::Message(format!(
                        "Failed to create log directory at {}: {}",
                        log_dir.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(())
    }
}
