//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预设回复；脚本只剩最后一条时重复返回它。记录每次调用的 user 消息，便于断言反馈传递。

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

/// Mock 客户端：脚本化回复 + 调用记录
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    /// 按顺序返回 responses，用尽后重复最后一条
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 每次都返回同一回复
    pub fn always(response: impl Into<String>) -> Self {
        Self::scripted([response.into()])
    }

    /// 每次都返回同一错误
    pub fn failing(err: LlmError) -> Self {
        Self {
            script: Mutex::new(VecDeque::from([Err(err)])),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 已发生的调用次数
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 每次调用的 user 消息内容（按调用顺序）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, messages: &[Message], _temperature: f32) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(last_user);

        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        match script.len() {
            0 => Err(LlmError::EmptyResponse),
            1 => script.front().cloned().unwrap_or(Err(LlmError::EmptyResponse)),
            _ => script.pop_front().unwrap_or(Err(LlmError::EmptyResponse)),
        }
    }
}
