//! 托管的 OpenAI 兼容服务（DeepSeek / Together）
//!
//! 二者都提供与 OpenAI 兼容的 chat/completions 接口，直接复用 OpenAiClient。
//! - DeepSeek: https://api.deepseek.com，模型 deepseek-chat / deepseek-reasoner
//! - Together: https://api.together.xyz/v1

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

pub const TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";
pub const TOGETHER_DEFAULT_MODEL: &str = "openai/gpt-oss-120b";

/// 创建 DeepSeek 客户端
///
/// - 优先使用环境变量 `DEEPSEEK_API_KEY`，其次 `OPENAI_API_KEY`
/// - 模型可通过 `model` 参数或 `DEEPSEEK_MODEL` 环境变量指定
pub fn create_deepseek_client(model: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), &model, Some(api_key.as_str()))
}

/// 创建 Together 客户端；Key 取自 `TOGETHER_API_KEY`，模型可由 `TOGETHER_MODEL` 覆盖
pub fn create_together_client(model: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("TOGETHER_API_KEY").unwrap_or_else(|_| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("TOGETHER_MODEL").ok())
        .unwrap_or_else(|| TOGETHER_DEFAULT_MODEL.to_string());

    OpenAiClient::new(Some(TOGETHER_BASE_URL), &model, Some(api_key.as_str()))
}
