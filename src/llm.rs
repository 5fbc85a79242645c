//! Text-generation boundary
//!
//! Every caller talks to a `TextGenerator`. Two HTTP implementations are
//! provided: an OpenAI-compatible chat-completions client and an Anthropic
//! Messages client. Test doubles implement the trait directly.

use crate::error::{CopilotError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Context/instructions sent as the system message.
    pub system: Option<String>,
    pub user: String,
}

impl Prompt {
    pub fn new(system: Option<String>, user: impl Into<String>) -> Self {
        Self {
            system,
            user: user.into(),
        }
    }

    pub fn user(user: impl Into<String>) -> Self {
        Self::new(None, user)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 500,
            top_p: None,
            stop_sequences: Vec::new(),
        }
    }
}

impl GenerationParams {
    /// Deterministic settings for warehouse SQL.
    pub fn sql() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1024,
            top_p: Some(1.0),
            stop_sequences: vec!["\n\nHuman:".to_string()],
        }
    }

    /// Resource-config expressions are short.
    pub fn config_dsl() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 200,
            top_p: None,
            stop_sequences: Vec::new(),
        }
    }

    /// Free-form prose for report summaries.
    pub fn summary() -> Self {
        Self {
            temperature: 0.5,
            max_tokens: 4096,
            top_p: None,
            stop_sequences: Vec::new(),
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for the prompt. Empty output is an error.
    async fn generate(&self, prompt: &Prompt, params: &GenerationParams) -> Result<String>;
}

fn build_http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| CopilotError::Config(format!("Failed to create HTTP client: {}", e)))
}

fn render(value: &serde_json::Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "Could not serialize".to_string())
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl LlmClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self> {
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: build_http_client()?,
        })
    }

    fn request_body(&self, prompt: &Prompt, params: &GenerationParams) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &prompt.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt.user}));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": params.temperature,
        });

        // Newer models reject max_tokens in favour of max_completion_tokens
        if self.model.starts_with("gpt-5") || self.model.contains("o1") || self.model.starts_with("gpt-4") {
            body["max_completion_tokens"] = serde_json::json!(params.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(params.max_tokens);
        }
        if let Some(top_p) = params.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if !params.stop_sequences.is_empty() {
            body["stop"] = serde_json::json!(params.stop_sequences);
        }
        body
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &Prompt, params: &GenerationParams) -> Result<String> {
        let body = self.request_body(prompt, params);
        debug!(model = %self.model, "calling chat completions");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CopilotError::Generation(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CopilotError::Generation(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CopilotError::Generation(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(CopilotError::Generation(format!("LLM API error: {}", render(error))));
        }

        let choice = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| CopilotError::Generation(format!("No choices in LLM response: {}", render(&response_json))))?;

        match choice.get("finish_reason").and_then(|r| r.as_str()) {
            Some("length") => warn!("LLM response was truncated due to length limit"),
            Some("content_filter") => {
                return Err(CopilotError::Generation("LLM response was filtered by content policy".to_string()));
            }
            _ => {}
        }

        let content = choice["message"]["content"].as_str().unwrap_or_default();
        if content.trim().is_empty() {
            return Err(CopilotError::Generation("Empty content in LLM response".to_string()));
        }
        Ok(content.to_string())
    }
}

/// Anthropic Messages API client.
#[derive(Clone)]
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl AnthropicClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    pub const DEFAULT_MODEL: &'static str = "claude-3-5-sonnet-20240620";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self> {
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: build_http_client()?,
        })
    }

    fn request_body(&self, prompt: &Prompt, params: &GenerationParams) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "messages": [{"role": "user", "content": prompt.user}],
        });
        if let Some(system) = &prompt.system {
            body["system"] = serde_json::json!(system);
        }
        if let Some(top_p) = params.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if !params.stop_sequences.is_empty() {
            body["stop_sequences"] = serde_json::json!(params.stop_sequences);
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    async fn generate(&self, prompt: &Prompt, params: &GenerationParams) -> Result<String> {
        let body = self.request_body(prompt, params);
        debug!(model = %self.model, "calling messages API");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| CopilotError::Generation(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CopilotError::Generation(format!("LLM API error ({}): {}", status, error_text)));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| CopilotError::Generation(format!("Failed to parse LLM response: {}", e)))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();

        if text.trim().is_empty() {
            return Err(CopilotError::Generation("Empty content in LLM response".to_string()));
        }
        Ok(text)
    }
}
