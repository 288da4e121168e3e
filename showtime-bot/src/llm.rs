//! Text generation backend.
//!
//! The orchestrator only sees [`TextGenerator`]. The shipped implementation
//! speaks the OpenAI-compatible `/v1/chat/completions` API, which most hosted
//! and local model servers accept.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use showtime_common::LlmConfig;
use std::time::Duration;

use crate::conversation::Turn;
use crate::error::{BotError, BotResult};
use crate::http::http_client;

/// One generation request: instructions, bounded history, new user text.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub history: Vec<Turn>,
    pub user_text: String,
}

/// Free-text generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> BotResult<String>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionResponseMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatibleGenerator {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    client: Client,
}

impl OpenAiCompatibleGenerator {
    pub fn new(config: &LlmConfig, timeout: Duration) -> BotResult<Self> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: http_client(timeout)?,
        })
    }

    fn messages<'a>(&self, request: &'a GenerationRequest) -> Vec<CompletionMessage<'a>> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(CompletionMessage {
            role: "system",
            content: &request.system,
        });
        for turn in &request.history {
            messages.push(CompletionMessage {
                role: turn.role.as_str(),
                content: &turn.text,
            });
        }
        messages.push(CompletionMessage {
            role: "user",
            content: &request.user_text,
        });
        messages
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn generate(&self, request: &GenerationRequest) -> BotResult<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            BotError::Config("LLM API key not set. Set OPENAI_API_KEY or llm.api_key.".into())
        })?;

        let body = CompletionRequest {
            model: &self.model,
            messages: self.messages(request),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(BotError::from_status(status.as_u16(), error_text));
        }

        let text = resp.text().await?;
        let parsed: CompletionResponse = serde_json::from_str(&text)?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BotError::InvalidPayload("Completion contained no text".into()))
    }
}
