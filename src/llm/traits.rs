//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Ollama / Mock）实现 LlmClient::complete（非流式）。
//! 本层不做重试：重试与降级由编排器的状态机负责。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::Message;

/// LLM 调用失败（网络、鉴权、模型端错误、超时）
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// LLM 客户端 trait：给定消息与温度，返回完整回复文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message], temperature: f32) -> Result<String, LlmError>;

    /// 后端名称，用于日志
    fn name(&self) -> &str;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
