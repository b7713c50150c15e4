//! Ollama 本地模型客户端（原生 /api/chat，非流式）
//!
//! 默认端点 http://localhost:11434；需先 `ollama serve` 并拉取模型（如 `ollama pull mistral`）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::{LlmClient, LlmError, Message};

pub const OLLAMA_DEFAULT_ENDPOINT: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "mistral";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// Ollama 客户端：持有 HTTP Client、端点与模型名
pub struct OllamaClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaClient {
    pub fn new(endpoint: Option<&str>, model: &str) -> Self {
        let endpoint = endpoint
            .unwrap_or(OLLAMA_DEFAULT_ENDPOINT)
            .trim_end_matches('/')
            .to_string();
        Self {
            http: reqwest::Client::new(),
            endpoint,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, messages: &[Message], temperature: f32) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: false,
            options: ChatOptions { temperature },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Ollama LLM call failed: {}", e);
                LlmError::Request(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "Ollama LLM call rejected");
            return Err(LlmError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let content = parsed.message.content.trim().to_string();
        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}
