//! Language-model capability and its OpenAI-compatible HTTP implementation.
//!
//! The engine consumes a single capability contract: given a model
//! identifier and an ordered message history, produce an utterance. Callers
//! (agents) convert any error into the empty-string failure value, so no
//! error subtype leaks into the scheduler.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A chat message with role and content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// The external utterance-generation capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate the next utterance from the full ordered history.
    async fn generate(&self, model: &str, history: &[ChatMessage]) -> Result<String>;
}

/// Request body for /v1/chat/completions.
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

/// Response from /v1/chat/completions.
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Client for an OpenAI-compatible chat completions endpoint.
///
/// Every request carries a bounded timeout so a non-responsive server
/// surfaces as an error (and then as an empty utterance) instead of hanging
/// the session.
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAiClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a client for the given base URL (e.g. "https://api.openai.com").
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: 1.0,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn generate(&self, model: &str, history: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model,
            messages: history,
            temperature: self.temperature,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send chat completion request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("chat completion request failed with status {}: {}", status, body);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .context("No choices in chat completion response")
    }
}
