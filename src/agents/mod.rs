//! 智能体层：五个基于 LLM 的阶段
//!
//! 每个智能体只做一次请求/响应：组装 user prompt → 调用 LLM → 解析回复。
//! 解析失败使用各自的兜底值（见各模块），LLM 本身的失败（网络、超时）向上传播。

pub mod corrector;
pub mod generator;
pub mod json;
pub mod planner;
pub mod prompts;
pub mod schema_linker;
pub mod sql_extract;
pub mod verifier;

use std::sync::Arc;
use std::time::Duration;

use crate::llm::{LlmClient, LlmError, Message};

pub use corrector::{CorrectionAction, CorrectionResult, Corrector};
pub use generator::{GenerationError, SqlGenerator};
pub use json::{decode_or, extract_json, Decoded};
pub use planner::{Planner, QueryPlan};
pub use prompts::PromptSet;
pub use schema_linker::{normalize_schema_context, Relationship, SchemaContext, SchemaLinker};
pub use sql_extract::{clean_sql, SqlExtractError};
pub use verifier::{Severity, VerificationResult, Verifier};

/// 智能体共享的调用上下文：LLM 客户端、温度、单次请求超时
#[derive(Clone)]
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
    timeout: Duration,
}

impl AgentRuntime {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f32, timeout: Duration) -> Self {
        Self {
            llm,
            temperature,
            timeout,
        }
    }

    pub fn llm_name(&self) -> &str {
        self.llm.name()
    }

    /// 以 system + user 两条消息调用一次 LLM
    pub async fn ask(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let messages = vec![Message::system(system_prompt), Message::user(user_prompt)];
        let reply =
            match tokio::time::timeout(self.timeout, self.llm.complete(&messages, self.temperature))
                .await
            {
                Ok(result) => result?,
                Err(_) => return Err(LlmError::Timeout(self.timeout.as_secs())),
            };
        let (prompt_tokens, completion_tokens, _) = self.llm.token_usage();
        tracing::debug!(
            llm = self.llm.name(),
            prompt_tokens,
            completion_tokens,
            reply_chars = reply.len(),
            "llm call finished"
        );
        Ok(reply)
    }
}

/// 回复预览，用于告警日志
pub(crate) fn preview(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() > MAX {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 把结构化值渲染为 prompt 中的缩进 JSON
pub(crate) fn pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
