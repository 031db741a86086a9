use serde::{Deserialize, Serialize};

/// Connection settings for an OpenAI-compatible completion/embedding endpoint.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LLMConfig {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "local-model".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            api_key: None,
            max_tokens: Some(1024),
            temperature: Some(0.2),
            request_timeout_secs: 60,
        }
    }
}
