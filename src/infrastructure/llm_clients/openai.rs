use super::{EmbeddingClient, LLMClient};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Client for OpenAI-compatible chat-completion endpoints (OpenAI, local
/// llama.cpp/vLLM servers, gateways).
pub struct OpenAIClient {
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(base_url: &str, path: &str) -> String {
        if base_url.ends_with('/') {
            format!("{}{}", base_url, path)
        } else {
            format!("{}/{}", base_url, path)
        }
    }

    fn map_send_error(e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(format!("Request timed out: {}", e))
        } else {
            AppError::Model(format!("Request failed: {}", e))
        }
    }
}

impl Default for OpenAIClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String> {
        let url = Self::endpoint(&config.base_url, "chat/completions");

        let body = json!({
            "model": config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
        });

        let mut req = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .json(&body);
        if let Some(api_key) = &config.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req.send().await.map_err(Self::map_send_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::RateLimited(format!("API error ({}): {}", status, text)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Model(format!("API error ({}): {}", status, text)));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Model(format!("Failed to parse JSON: {}", e)))?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Model("Invalid response format".to_string()))
    }
}

/// Embedding client over the same OpenAI-compatible endpoint family.
pub struct OpenAIEmbeddingClient {
    client: reqwest::Client,
    config: LLMConfig,
}

impl OpenAIEmbeddingClient {
    pub fn new(config: LLMConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = OpenAIClient::endpoint(&self.config.base_url, "embeddings");

        let body = json!({
            "model": self.config.embedding_model,
            "input": text,
        });

        let mut req = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| AppError::Embedding(format!("Request failed ({}): {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding(format!("API error ({}): {}", status, text)));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("Failed to parse JSON: {}", e)))?;

        let embedding: Vec<f32> = json["data"][0]["embedding"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
            .unwrap_or_default();

        if embedding.is_empty() {
            return Err(AppError::Embedding("Empty embedding response".to_string()));
        }
        Ok(embedding)
    }
}
