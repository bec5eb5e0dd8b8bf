use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::adapters::llm::{
    send_with_retry, LLMAdapter, LLMRequest, LLMResponse, ModelConfig, Usage, OLLAMA_PREFIX,
};

/// Client for any OpenAI-compatible chat completions endpoint, including
/// a local Ollama server.
pub struct OpenAIAdapter {
    client: Client,
    model: String,
    config: ModelConfig,
    api_key: Option<String>,
    base_url: String,
    provider: &'static str,
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
    usage: Option<OpenAIUsage>,
    model: String,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

impl OpenAIAdapter {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .context("OpenAI API key not found. Set OPENAI_API_KEY environment variable or provide in config")?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            client,
            model: config.model_name.clone(),
            config,
            api_key: Some(api_key),
            base_url,
            provider: "OpenAI",
        })
    }

    /// `ollama:<model>` against `http://localhost:11434/v1` unless a base URL
    /// is configured. No API key is required.
    pub fn for_ollama(config: ModelConfig) -> Result<Self> {
        let model = config
            .model_name
            .strip_prefix(OLLAMA_PREFIX)
            .unwrap_or(&config.model_name)
            .to_string();

        let base_url = config
            .base_url
            .clone()
            .map(|url| {
                let url = url.trim_end_matches('/').to_string();
                if url.ends_with("/v1") {
                    url
                } else {
                    format!("{}/v1", url)
                }
            })
            .unwrap_or_else(|| "http://localhost:11434/v1".to_string());

        let client = Client::builder().timeout(Duration::from_secs(300)).build()?;

        Ok(Self {
            client,
            model,
            api_key: config.api_key.clone(),
            config,
            base_url,
            provider: "Ollama",
        })
    }
}

#[async_trait]
impl LLMAdapter for OpenAIAdapter {
    async fn complete(&self, request: LLMRequest) -> Result<LLMResponse> {
        let messages = vec![
            Message {
                role: "system".to_string(),
                content: request.system_prompt,
            },
            Message {
                role: "user".to_string(),
                content: request.user_prompt,
            },
        ];

        let model = request
            .model
            .map(|m| m.strip_prefix(OLLAMA_PREFIX).map(str::to_string).unwrap_or(m))
            .unwrap_or_else(|| self.model.clone());

        let openai_request = OpenAIRequest {
            model,
            messages,
            temperature: request.temperature.unwrap_or(self.config.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = send_with_retry(self.provider, || {
            let builder = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&openai_request);
            match &self.api_key {
                Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
                None => builder,
            }
        })
        .await
        .with_context(|| format!("Failed to send request to {}", self.provider))?;

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.provider))?;

        let content = openai_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(LLMResponse {
            content,
            model: openai_response.model,
            usage: openai_response.usage.map(|usage| Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            }),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
