//! Model client abstraction.
//!
//! [`ModelClient`] is the narrow interface to the external embedding and
//! text-completion service. Concrete HTTP clients (Ollama, OpenAI-compatible)
//! live in the `pagewise` app crate.

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::RawEmbedding;
use crate::models::Turn;

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Returns the chat model identifier (e.g. `"llama3.2"`).
    fn model_name(&self) -> &str;

    /// Embed one text. The returned shape may be nested; see
    /// [`normalize_embedding`](crate::embedding::normalize_embedding).
    async fn embed(&self, text: &str) -> Result<RawEmbedding>;

    /// One-shot completion: a system instruction plus one user message.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Completion over a full transcript, oldest turn first.
    async fn complete_with_history(&self, turns: &[Turn]) -> Result<String>;

    /// Whether the service has finished loading its models.
    async fn is_ready(&self) -> Result<bool>;
}
