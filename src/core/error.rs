//! 流水线错误
//!
//! 预期内的失败（JSON 无法解析、SQL 执行错误、纠错拒绝、生成缺陷）不会出现在这里，
//! 它们由状态机转成反馈并驱动重试；这里只有需要终止当前问题的失败。

use thiserror::Error;

use crate::database::SchemaError;
use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}
