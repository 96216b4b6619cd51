//! Configuration management
//!
//! Loads TOML configuration with per-field defaults and validates it
//! eagerly so strategy or threshold mistakes fail at startup, not
//! halfway through a batch.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::TriageError;
use crate::index::IndexStrategy;
use crate::resolve::ResolverStrategy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model API settings
    #[serde(default)]
    pub api: ApiConfig,
    /// Feedback store settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Similarity index settings
    #[serde(default)]
    pub index: IndexConfig,
    /// Conflict resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Prompt composition settings
    #[serde(default)]
    pub prompt: PromptConfig,
    /// Classification engine settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Embedding collaborator settings
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the OpenAI-compatible chat API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model identifier passed to the API
    #[serde(default = "default_model")]
    pub model: String,
    /// API key; usually supplied via OPENROUTER_API_KEY instead
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Maximum tokens in the model answer
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "z-ai/glm-5".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    512
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database holding feedback history
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("buglink")
        .join("feedback.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Similarity strategy: lexical token overlap or dense embeddings
    #[serde(default)]
    pub strategy: IndexStrategy,
    /// Maximum number of similar records to retrieve per bug
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Records scoring below this are never retrieved
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
}

fn default_top_k() -> usize {
    5
}

fn default_min_similarity() -> f64 {
    0.7
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            strategy: IndexStrategy::default(),
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// How contradictory past corrections are reconciled
    #[serde(default)]
    pub strategy: ResolverStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Cap on illustrative past corrections rendered into the prompt
    #[serde(default = "default_max_examples")]
    pub max_examples: usize,
    /// Guidance entries below this weight contribute no exemplars
    #[serde(default = "default_min_example_weight")]
    pub min_example_weight: f64,
    /// Cap on extracted keywords rendered into the prompt
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

fn default_max_examples() -> usize {
    5
}

fn default_min_example_weight() -> f64 {
    0.05
}

fn default_max_keywords() -> usize {
    8
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_examples: default_max_examples(),
            min_example_weight: default_min_example_weight(),
            max_keywords: default_max_keywords(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Answers below this confidence are flagged for human review
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Retries after the first attempt, transient transport failures only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds, doubled per attempt
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Bound on concurrently in-flight classifications
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Overall run deadline in seconds; None means unbounded
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,
}

fn default_min_confidence() -> f64 {
    0.6
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_concurrency() -> usize {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            concurrency: default_concurrency(),
            run_deadline_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Enable the embedding collaborator for the dense index strategy
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the OpenAI-compatible embeddings API
    #[serde(default = "default_embeddings_base_url")]
    pub base_url: String,
    /// Embedding model identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Expected vector dimension
    #[serde(default = "default_embedding_dim")]
    pub dimension: usize,
    /// Maximum input length in tokens (rough truncation bound)
    #[serde(default = "default_embedding_max_length")]
    pub max_length: usize,
}

fn default_embeddings_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_embedding_model() -> String {
    "openai/text-embedding-3-small".to_string()
}

fn default_embedding_dim() -> usize {
    1536
}

fn default_embedding_max_length() -> usize {
    8191
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_embeddings_base_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dim(),
            max_length: default_embedding_max_length(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    /// A missing file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Default config file location: `<config_dir>/buglink/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(dir.join("buglink").join("config.toml"))
    }

    /// Validate thresholds and strategy combinations.
    ///
    /// Strategy names themselves are closed serde enums, so unknown names
    /// already fail during parsing; this catches out-of-range values.
    pub fn validate(&self) -> std::result::Result<(), TriageError> {
        if !(0.0..=1.0).contains(&self.engine.min_confidence) {
            return Err(TriageError::Config(format!(
                "engine.min_confidence must be in [0, 1], got {}",
                self.engine.min_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.index.min_similarity) {
            return Err(TriageError::Config(format!(
                "index.min_similarity must be in [0, 1], got {}",
                self.index.min_similarity
            )));
        }
        if self.index.top_k == 0 {
            return Err(TriageError::Config(
                "index.top_k must be at least 1".to_string(),
            ));
        }
        if self.engine.concurrency == 0 {
            return Err(TriageError::Config(
                "engine.concurrency must be at least 1".to_string(),
            ));
        }
        if self.prompt.min_example_weight < 0.0 {
            return Err(TriageError::Config(
                "prompt.min_example_weight must not be negative".to_string(),
            ));
        }
        if self.index.strategy == IndexStrategy::Dense && !self.embeddings.enabled {
            return Err(TriageError::Config(
                "index.strategy = \"dense\" requires embeddings.enabled = true".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.index.top_k, 5);
        assert!((config.index.min_similarity - 0.7).abs() < f64::EPSILON);
        assert!((config.engine.min_confidence - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.engine.max_retries, 2);
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut config = Config::default();
        config.engine.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_dense_without_embeddings() {
        let mut config = Config::default();
        config.index.strategy = IndexStrategy::Dense;
        config.embeddings.enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_strategy_fails_at_parse_time() {
        let toml_str = r#"
            [resolver]
            strategy = "democracy"
        "#;
        let parsed: std::result::Result<Config, _> = toml::from_str(toml_str);
        assert!(parsed.is_err());
    }

    #[test]
    fn parses_partial_config() {
        let toml_str = r#"
            [engine]
            min_confidence = 0.8

            [index]
            strategy = "lexical"
            top_k = 3
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!((config.engine.min_confidence - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.index.top_k, 3);
        assert_eq!(config.engine.max_retries, 2);
    }
}
