//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a minimal file only names
//! the database path. [`load_config`] parses and validates.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,
    #[serde(default = "default_results_channel")]
    pub results_channel: String,
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    #[serde(default = "default_failure_backoff_ms")]
    pub failure_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            results_channel: default_results_channel(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            failure_backoff_ms: default_failure_backoff_ms(),
        }
    }
}

impl QueueConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }
}

fn default_queue_name() -> String {
    "queue:tasks".to_string()
}
fn default_results_channel() -> String {
    "process:results".to_string()
}
fn default_dequeue_timeout_ms() -> u64 {
    1000
}
fn default_failure_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
        }
    }
}

fn default_max_size() -> usize {
    pagewise_core::chunk::DEFAULT_MAX_CHUNK_SIZE
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Hits fetched from the index before filtering by task.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Hits kept after filtering.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            top_k: default_top_k(),
        }
    }
}

fn default_candidate_k() -> usize {
    10
}
fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            chat_model: None,
            embedding_model: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReadinessConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Backend endpoint that receives the one-shot models-ready POST.
    #[serde(default)]
    pub notify_url: Option<String>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            notify_url: None,
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Parse a config from TOML text and validate it.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_size == 0 {
        anyhow::bail!("chunking.max_size must be > 0");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_k < config.retrieval.top_k {
        anyhow::bail!("retrieval.candidate_k must be >= retrieval.top_k");
    }

    if config.queue.dequeue_timeout_ms == 0 {
        anyhow::bail!("queue.dequeue_timeout_ms must be > 0");
    }

    match config.model.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }

    if config.model.is_enabled() {
        if config.model.chat_model.is_none() {
            anyhow::bail!(
                "model.chat_model must be specified when provider is '{}'",
                config.model.provider
            );
        }
        if config.model.embedding_model.is_none() {
            anyhow::bail!(
                "model.embedding_model must be specified when provider is '{}'",
                config.model.provider
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"./data/pagewise.sqlite\"\n").unwrap();
        assert_eq!(config.queue.name, "queue:tasks");
        assert_eq!(config.queue.results_channel, "process:results");
        assert_eq!(config.chunking.max_size, 1500);
        assert_eq!(config.retrieval.candidate_k, 10);
        assert_eq!(config.retrieval.top_k, 3);
        assert!(!config.model.is_enabled());
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn test_enabled_provider_requires_models() {
        let err = parse_config(
            "[db]\npath = \"x.sqlite\"\n[model]\nprovider = \"ollama\"\nchat_model = \"llama3.2\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding_model"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err =
            parse_config("[db]\npath = \"x.sqlite\"\n[model]\nprovider = \"mystery\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown model provider"));
    }

    #[test]
    fn test_top_k_bounded_by_candidates() {
        let err = parse_config(
            "[db]\npath = \"x.sqlite\"\n[retrieval]\ncandidate_k = 2\ntop_k = 3\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("candidate_k"));
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/pagewise.example.toml")).unwrap();
        assert_eq!(config.model.provider, "ollama");
        assert_eq!(config.model.chat_model.as_deref(), Some("llama3.2"));
        assert!(config.readiness.notify_url.is_none());
    }
}
