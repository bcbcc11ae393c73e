//! Chat model client.
//!
//! [`ChatModel`] is the seam the orchestrator talks to. It exposes the two
//! interfaces an Ollama server offers:
//!
//! | Method | Ollama endpoint | Used for |
//! |--------|-----------------|----------|
//! | [`chat`](ChatModel::chat) | `POST /api/chat` | conversational answers with history |
//! | [`generate`](ChatModel::generate) | `POST /api/generate` | single-shot flashcard / quiz prompts |
//!
//! Failures are typed: a transport error is [`LlmError::Unreachable`] and
//! a non-2xx status is [`LlmError::Backend`], so the HTTP layer can report
//! them instead of passing an error string back as an answer. There is no
//! retry; the client timeout (`llm.timeout_secs`) bounds every call.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::LlmConfig;
use crate::models::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Error connecting to LLM at {url}. Is Ollama running? ({reason})")]
    Unreachable { url: String, reason: String },
    #[error("LLM returned {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Send an ordered message list, return the assistant reply.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Single-shot completion of `prompt` under `system`.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

pub struct OllamaClient {
    model: String,
    url: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client,
        })
    }

    fn options(&self) -> serde_json::Value {
        match self.temperature {
            Some(t) => serde_json::json!({ "temperature": t }),
            None => serde_json::json!({}),
        }
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, LlmError> {
        let endpoint = format!("{}{}", self.url, path);
        debug!(endpoint = %endpoint, model = %self.model, "calling chat model");

        let response = self
            .client
            .post(&endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Unreachable {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": self.options(),
        });
        let json = self.post("/api/chat", &body).await?;
        parse_chat_response(&json)
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "system": system,
            "stream": false,
            "options": self.options(),
        });
        let json = self.post("/api/generate", &body).await?;
        parse_generate_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String, LlmError> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| LlmError::InvalidResponse("missing message.content".to_string()))
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String, LlmError> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| LlmError::InvalidResponse("missing response".to_string()))
}
