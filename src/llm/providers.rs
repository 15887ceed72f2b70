//! Provider implementations for the `LlmClient` trait.
//!
//! Claude talks to the Anthropic messages API; OpenAI and Perplexity share
//! the chat-completions wire format and differ only in endpoint and
//! defaults.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::types::{ChatMessage, LlmResponse, MessageRole};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const PERPLEXITY_API_URL: &str = "https://api.perplexity.ai/chat/completions";

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_PERPLEXITY_MODEL: &str = "sonar-pro";

/// A completion-capable LLM client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn model_name(&self) -> &str;

    /// Send a completion request for the given conversation.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, LlmError>;
}

// ── Claude ──────────────────────────────────────────────────────────

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_CLAUDE_MODEL.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider_name(&self) -> &'static str {
        "claude"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, LlmError> {
        debug!(model = %self.model, "Sending completion request to Claude");

        let body = anthropic_request_body(&self.model, self.max_tokens, self.temperature, messages);
        let response = self
            .http
            .post(ANTHROPIC_API_URL)
            .timeout(REQUEST_TIMEOUT)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: "claude".to_string(),
                reason: format!("HTTP {status}: {detail}"),
            });
        }

        let value = response.json::<serde_json::Value>().await?;
        parse_anthropic_response(value)
    }
}

// ── OpenAI-compatible (OpenAI, Perplexity) ──────────────────────────

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    provider: &'static str,
    url: &'static str,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompatClient {
    pub fn openai(config: &LlmConfig) -> Self {
        Self::with_endpoint(config, "openai", OPENAI_API_URL, DEFAULT_OPENAI_MODEL)
    }

    pub fn perplexity(config: &LlmConfig) -> Self {
        Self::with_endpoint(
            config,
            "perplexity",
            PERPLEXITY_API_URL,
            DEFAULT_PERPLEXITY_MODEL,
        )
    }

    fn with_endpoint(
        config: &LlmConfig,
        provider: &'static str,
        url: &'static str,
        default_model: &str,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            provider,
            url,
            api_key: config.api_key.clone(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn provider_name(&self) -> &'static str {
        self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, LlmError> {
        debug!(provider = self.provider, model = %self.model, "Sending completion request");

        let body = chat_request_body(&self.model, self.max_tokens, self.temperature, messages);
        let response = self
            .http
            .post(self.url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: format!("HTTP {status}: {detail}"),
            });
        }

        let value = response.json::<serde_json::Value>().await?;
        parse_chat_response(self.provider, value)
    }
}

// ── Request construction ────────────────────────────────────────────

/// Anthropic separates the system prompt from the conversation; the last
/// system message wins.
pub(crate) fn anthropic_request_body(
    model: &str,
    max_tokens: u32,
    temperature: f32,
    messages: &[ChatMessage],
) -> serde_json::Value {
    let mut system = None;
    let mut conversation = Vec::new();
    for message in messages {
        match message.role {
            MessageRole::System => system = Some(message.content.clone()),
            role => conversation.push(json!({
                "role": role.as_str(),
                "content": message.content,
            })),
        }
    }

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "messages": conversation,
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    body
}

pub(crate) fn chat_request_body(
    model: &str,
    max_tokens: u32,
    temperature: f32,
    messages: &[ChatMessage],
) -> serde_json::Value {
    let conversation: Vec<_> = messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "messages": conversation,
    })
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

pub(crate) fn parse_anthropic_response(body: serde_json::Value) -> Result<LlmResponse, LlmError> {
    let invalid = |reason: String| LlmError::InvalidResponse {
        provider: "claude".to_string(),
        reason,
    };

    let parsed: AnthropicResponse =
        serde_json::from_value(body).map_err(|e| invalid(e.to_string()))?;
    let content = parsed
        .content
        .into_iter()
        .next()
        .ok_or_else(|| invalid("empty content".to_string()))?
        .text;

    Ok(LlmResponse {
        content,
        model: parsed.model,
        input_tokens: parsed.usage.as_ref().and_then(|u| u.input_tokens),
        output_tokens: parsed.usage.as_ref().and_then(|u| u.output_tokens),
        stop_reason: parsed.stop_reason,
    })
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    model: String,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

pub(crate) fn parse_chat_response(
    provider: &str,
    body: serde_json::Value,
) -> Result<LlmResponse, LlmError> {
    let invalid = |reason: String| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason,
    };

    let parsed: ChatResponse = serde_json::from_value(body).map_err(|e| invalid(e.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| invalid("empty choices".to_string()))?;

    Ok(LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        model: parsed.model,
        input_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
        output_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
        stop_reason: choice.finish_reason,
    })
}
