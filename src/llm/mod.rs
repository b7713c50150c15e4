//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Together / Ollama / Mock）与嵌入

pub mod compatible;
pub mod embedding;
pub mod message;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use compatible::{create_deepseek_client, create_together_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use embedding::{create_embedder_from_config, EmbeddingProvider, OllamaEmbedder, OpenAiEmbedder};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use traits::{LlmClient, LlmError};

use crate::config::LlmSection;

/// 根据配置选择 LLM 后端（ollama / openai / deepseek / together）
///
/// 未知 provider 时退回 Ollama（与默认配置一致，本地可用、无需 Key）。
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    match cfg.provider.to_lowercase().as_str() {
        "openai" => {
            let model = cfg
                .openai
                .model
                .clone()
                .or_else(|| cfg.model.clone())
                .or_else(|| std::env::var("OPENAI_LLM_MODEL").ok())
                .unwrap_or_else(|| "gpt-4-turbo".to_string());
            if std::env::var("OPENAI_API_KEY").is_err() {
                tracing::warn!("LLM provider is openai but OPENAI_API_KEY is not set");
            }
            tracing::info!("Using OpenAI LLM ({})", model);
            Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            ))
        }
        "deepseek" => {
            let model = cfg.deepseek.model.clone().or_else(|| cfg.model.clone());
            tracing::info!("Using DeepSeek LLM");
            Arc::new(create_deepseek_client(model.as_deref()))
        }
        "together" => {
            let model = cfg.together.model.clone().or_else(|| cfg.model.clone());
            tracing::info!("Using Together LLM");
            Arc::new(create_together_client(model.as_deref()))
        }
        provider => {
            if provider != "ollama" {
                tracing::warn!("Unknown LLM provider '{}', falling back to Ollama", provider);
            }
            let model = cfg
                .ollama
                .model
                .clone()
                .or_else(|| cfg.model.clone())
                .unwrap_or_else(|| ollama::OLLAMA_DEFAULT_MODEL.to_string());
            tracing::info!("Using Ollama LLM ({})", model);
            Arc::new(OllamaClient::new(cfg.ollama.endpoint.as_deref(), &model))
        }
    }
}
