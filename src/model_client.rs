//! HTTP [`ModelClient`] implementations.
//!
//! - **[`DisabledModelClient`]**: returns errors; used when `model.provider = "disabled"`.
//! - **[`HttpModelClient`]**: talks to Ollama or an OpenAI-compatible API.
//!
//! | Operation | Ollama | OpenAI |
//! |-----------|--------|--------|
//! | embed | `POST /api/embed` | `POST /v1/embeddings` |
//! | complete | `POST /api/chat` | `POST /v1/chat/completions` |
//! | readiness | `GET /api/tags` lists both models | `GET /v1/models` answers 2xx |
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use pagewise_core::embedding::RawEmbedding;
use pagewise_core::model::ModelClient;
use pagewise_core::models::Turn;

use crate::config::ModelConfig;

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

/// Build the client selected by `config.provider`.
pub fn create_model_client(config: &ModelConfig) -> Result<Arc<dyn ModelClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModelClient)),
        "ollama" => Ok(Arc::new(HttpModelClient::new(Provider::Ollama, config)?)),
        "openai" => Ok(Arc::new(HttpModelClient::new(Provider::OpenAi, config)?)),
        other => bail!("Unknown model provider: {}", other),
    }
}

/// Always errors.
pub struct DisabledModelClient;

#[async_trait]
impl ModelClient for DisabledModelClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str) -> Result<RawEmbedding> {
        bail!("Model provider is disabled")
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        bail!("Model provider is disabled")
    }

    async fn complete_with_history(&self, _turns: &[Turn]) -> Result<String> {
        bail!("Model provider is disabled")
    }

    async fn is_ready(&self) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAi,
}

impl Provider {
    fn label(&self) -> &'static str {
        match self {
            Provider::Ollama => "Ollama",
            Provider::OpenAi => "OpenAI",
        }
    }
}

pub struct HttpModelClient {
    provider: Provider,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpModelClient {
    /// # Errors
    ///
    /// Returns an error if either model name is missing, or if the provider
    /// is OpenAI and `OPENAI_API_KEY` is not set.
    pub fn new(provider: Provider, config: &ModelConfig) -> Result<Self> {
        let chat_model = config
            .chat_model
            .clone()
            .ok_or_else(|| anyhow!("model.chat_model required for {} provider", provider.label()))?;
        let embedding_model = config.embedding_model.clone().ok_or_else(|| {
            anyhow!(
                "model.embedding_model required for {} provider",
                provider.label()
            )
        })?;

        let api_key = match provider {
            Provider::OpenAi => Some(
                std::env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?,
            ),
            Provider::Ollama => None,
        };

        let default_url = match provider {
            Provider::Ollama => OLLAMA_DEFAULT_URL,
            Provider::OpenAi => OPENAI_DEFAULT_URL,
        };
        let base_url = config
            .url
            .as_deref()
            .unwrap_or(default_url)
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            provider,
            base_url,
            chat_model,
            embedding_model,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    /// POST a JSON body with retry/backoff and return the parsed response.
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let label = self.provider.label();
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, delay_secs = delay.as_secs(), path, "retrying model request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .request(reqwest::Method::POST, path)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                        continue;
                    }

                    bail!("{} API error {}: {}", label, status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow!(
                        "{} connection error (is it running at {}?): {}",
                        label,
                        self.base_url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", label)))
    }

    fn chat_body(&self, messages: Vec<Value>) -> Value {
        match self.provider {
            Provider::Ollama => json!({
                "model": self.chat_model,
                "messages": messages,
                "stream": false,
            }),
            Provider::OpenAi => json!({
                "model": self.chat_model,
                "messages": messages,
            }),
        }
    }

    async fn chat(&self, messages: Vec<Value>) -> Result<String> {
        let body = self.chat_body(messages);
        match self.provider {
            Provider::Ollama => {
                let json = self.post_json("/api/chat", &body).await?;
                parse_ollama_chat(&json)
            }
            Provider::OpenAi => {
                let json = self.post_json("/v1/chat/completions", &body).await?;
                parse_openai_chat(&json)
            }
        }
    }
}

fn turn_to_message(turn: &Turn) -> Value {
    json!({ "role": turn.role.as_str(), "content": turn.content })
}

#[async_trait]
impl ModelClient for HttpModelClient {
    fn model_name(&self) -> &str {
        &self.chat_model
    }

    async fn embed(&self, text: &str) -> Result<RawEmbedding> {
        let body = json!({ "model": self.embedding_model, "input": text });
        match self.provider {
            Provider::Ollama => {
                let json = self.post_json("/api/embed", &body).await?;
                parse_ollama_embedding(json)
            }
            Provider::OpenAi => {
                let json = self.post_json("/v1/embeddings", &body).await?;
                parse_openai_embedding(&json)
            }
        }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.chat(vec![
            turn_to_message(&Turn::system(system)),
            turn_to_message(&Turn::user(user)),
        ])
        .await
    }

    async fn complete_with_history(&self, turns: &[Turn]) -> Result<String> {
        self.chat(turns.iter().map(turn_to_message).collect()).await
    }

    async fn is_ready(&self) -> Result<bool> {
        match self.provider {
            Provider::Ollama => {
                let response = self
                    .request(reqwest::Method::GET, "/api/tags")
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Ok(false);
                }
                let json: Value = response.json().await?;
                let loaded = ollama_model_names(&json);
                Ok(model_listed(&loaded, &self.chat_model)
                    && model_listed(&loaded, &self.embedding_model))
            }
            Provider::OpenAi => {
                let response = self
                    .request(reqwest::Method::GET, "/v1/models")
                    .send()
                    .await?;
                Ok(response.status().is_success())
            }
        }
    }
}

/// `{"embeddings": [[...]]}` → raw nested shape, normalized by the caller.
fn parse_ollama_embedding(mut json: Value) -> Result<RawEmbedding> {
    let embeddings = json
        .get_mut("embeddings")
        .map(Value::take)
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings"))?;
    RawEmbedding::from_json(embeddings)
        .ok_or_else(|| anyhow!("Invalid Ollama response: embeddings are not numeric"))
}

/// `{"data": [{"embedding": [...]}, ...]}` → one nested entry per item.
fn parse_openai_embedding(json: &Value) -> Result<RawEmbedding> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let items = data
        .iter()
        .map(|item| {
            item.get("embedding")
                .cloned()
                .and_then(RawEmbedding::from_json)
                .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RawEmbedding::Nested(items))
}

fn parse_ollama_chat(json: &Value) -> Result<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
}

fn parse_openai_chat(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

fn ollama_model_names(json: &Value) -> Vec<String> {
    json.get("models")
        .and_then(|m| m.as_array())
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Ollama tags omitted in config default to `:latest`.
fn model_listed(loaded: &[String], wanted: &str) -> bool {
    loaded.iter().any(|name| {
        name == wanted
            || (!wanted.contains(':') && name.strip_suffix(":latest") == Some(wanted))
    })
}
