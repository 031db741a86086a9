pub mod openai;

use crate::domain::error::Result;
use crate::domain::llm_config::LLMConfig;
use async_trait::async_trait;

/// Opaque completion function. Fails with `RateLimited`, `Timeout` or
/// `Model`; all are transient and retried with backoff by the orchestrator,
/// never here.
#[async_trait]
pub trait LLMClient {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String>;
}

/// Opaque embedding function. Fails with `Embedding` (transient).
#[async_trait]
pub trait EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
