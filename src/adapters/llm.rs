use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub const OLLAMA_PREFIX: &str = "ollama:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: "gpt-4o".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.2,
            max_tokens: 4000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    /// Overrides the adapter's configured model for this call.
    pub model: Option<String>,
}

impl LLMRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: None,
            max_tokens: None,
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn complete(&self, request: LLMRequest) -> Result<LLMResponse>;
    fn model_name(&self) -> &str;
}

pub fn create_adapter(config: &ModelConfig) -> Result<Box<dyn LLMAdapter>> {
    match config.model_name.as_str() {
        name if name.starts_with("claude") => {
            Ok(Box::new(crate::adapters::AnthropicAdapter::new(config.clone())?))
        }
        // Ollama serves the OpenAI chat completions API under /v1
        name if name.starts_with(OLLAMA_PREFIX) => {
            Ok(Box::new(crate::adapters::OpenAIAdapter::for_ollama(config.clone())?))
        }
        _name if config.base_url.as_ref().is_some_and(|u| u.contains("11434")) => {
            Ok(Box::new(crate::adapters::OpenAIAdapter::for_ollama(config.clone())?))
        }
        _ => Ok(Box::new(crate::adapters::OpenAIAdapter::new(config.clone())?)),
    }
}

const MAX_RETRIES: usize = 2;
const BASE_DELAY_MS: u64 = 250;

/// Sends the request built by `make_request`, retrying rate limits, server
/// errors and transport failures with a linearly growing delay.
pub(crate) async fn send_with_retry<F>(provider: &str, mut make_request: F) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    for attempt in 0..=MAX_RETRIES {
        let delay = Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1));
        match make_request().send().await {
            Ok(response) => {
                if response.status().is_success() {
                    return Ok(response);
                }

                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if is_retryable_status(status) && attempt < MAX_RETRIES {
                    warn!("{} returned {}, retrying (attempt {})", provider, status, attempt + 1);
                    sleep(delay).await;
                    continue;
                }

                anyhow::bail!("{} API error ({}): {}", provider, status, body);
            }
            Err(err) => {
                if attempt < MAX_RETRIES {
                    warn!("{} request failed: {}, retrying", provider, err);
                    sleep(delay).await;
                    continue;
                }
                return Err(err.into());
            }
        }
    }

    anyhow::bail!("{} request failed after retries", provider);
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_only_rate_limits_and_server_errors() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn routes_models_to_adapters() {
        let ollama = ModelConfig {
            model_name: "ollama:llama3".to_string(),
            ..ModelConfig::default()
        };
        let adapter = create_adapter(&ollama).unwrap();
        assert_eq!(adapter.model_name(), "llama3");

        let openai = ModelConfig {
            model_name: "gpt-4o-mini".to_string(),
            api_key: Some("key".to_string()),
            ..ModelConfig::default()
        };
        assert_eq!(create_adapter(&openai).unwrap().model_name(), "gpt-4o-mini");

        let claude = ModelConfig {
            model_name: "claude-3-5-sonnet-20241022".to_string(),
            api_key: Some("key".to_string()),
            ..ModelConfig::default()
        };
        assert_eq!(
            create_adapter(&claude).unwrap().model_name(),
            "claude-3-5-sonnet-20241022"
        );
    }
}
