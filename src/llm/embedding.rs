//! 嵌入 API：供查询记忆使用
//!
//! 两个后端：OpenAI 兼容的 /embeddings（async-openai）与 Ollama 的 /api/embeddings（reqwest）。
//! 任何失败（网络、超时、空向量）都记录告警并返回 None，表示「记忆暂不可用」，不向上传播。

use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingSection;
use crate::llm::ollama::OLLAMA_DEFAULT_ENDPOINT;

/// 嵌入提供方：None 表示不可用（而非错误）
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn embed_inner(&self, text: &str) -> Result<Vec<f32>, String> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        Ok(response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        match tokio::time::timeout(self.timeout, self.embed_inner(text)).await {
            Ok(Ok(v)) if !v.is_empty() => Some(v),
            Ok(Ok(_)) => {
                tracing::warn!("OpenAI embedding returned an empty vector");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    "OpenAI embedding failed ({}). Check your API key and access to model {}",
                    e,
                    self.model
                );
                None
            }
            Err(_) => {
                tracing::warn!("OpenAI embedding timed out after {:?}", self.timeout);
                None
            }
        }
    }
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Ollama 嵌入（默认模型 nomic-embed-text）
pub struct OllamaEmbedder {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(endpoint: Option<&str>, model: &str, timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint
                .unwrap_or(OLLAMA_DEFAULT_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn embed_inner(&self, text: &str) -> Result<Vec<f32>, String> {
        let response = self
            .http
            .post(format!("{}/api/embeddings", self.endpoint))
            .json(&OllamaEmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        let parsed: OllamaEmbeddingResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        match tokio::time::timeout(self.timeout, self.embed_inner(text)).await {
            Ok(Ok(v)) if !v.is_empty() => Some(v),
            Ok(Ok(_)) => {
                tracing::warn!("Ollama embedding returned an empty vector");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    "Ollama embedding failed ({}). Make sure Ollama is running on {} and `ollama pull {}` was done",
                    e,
                    self.endpoint,
                    self.model
                );
                None
            }
            Err(_) => {
                tracing::warn!("Ollama embedding timed out after {:?}", self.timeout);
                None
            }
        }
    }
}

/// 从应用配置创建嵌入提供方；未启用或缺少 OpenAI Key 时返回 None
pub fn create_embedder_from_config(cfg: &EmbeddingSection) -> Option<Arc<dyn EmbeddingProvider>> {
    if !cfg.enabled {
        tracing::debug!("embedding disabled by config");
        return None;
    }
    match cfg.provider.to_lowercase().as_str() {
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY").ok().unwrap_or_default();
            if key.is_empty() || key == "sk-placeholder" {
                tracing::warn!("embedding skipped: no OPENAI_API_KEY");
                return None;
            }
            let model = cfg
                .model
                .clone()
                .unwrap_or_else(|| "text-embedding-3-large".to_string());
            tracing::info!("Using OpenAI embeddings ({})", model);
            Some(Arc::new(OpenAiEmbedder::new(
                cfg.endpoint.as_deref(),
                &model,
                &key,
                cfg.timeout_secs,
            )))
        }
        "ollama" => {
            let model = cfg
                .model
                .clone()
                .unwrap_or_else(|| "nomic-embed-text".to_string());
            tracing::info!("Using Ollama embeddings ({})", model);
            Some(Arc::new(OllamaEmbedder::new(
                cfg.endpoint.as_deref(),
                &model,
                cfg.timeout_secs,
            )))
        }
        other => {
            tracing::warn!("Unknown embedding provider '{}', query memory disabled", other);
            None
        }
    }
}
