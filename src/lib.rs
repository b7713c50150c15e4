//! Text2SQL - Rust 多智能体 Text-to-SQL 系统
//!
//! 模块划分：
//! - **agents**: Schema Linking / Planning / SQL 生成 / 校验 / 纠错五个 LLM 智能体，JSON 解码与 SQL 抽取
//! - **config**: 应用配置加载（TOML + .env + 环境变量）
//! - **core**: 编排状态机（三层重试）、错误、结果快照与过程事件
//! - **database**: 目标库 Schema 提取与 SQL 执行
//! - **llm**: LLM / Embedding 客户端抽象与实现（OpenAI 兼容 / Ollama / Mock）
//! - **memory**: 查询记忆（相似问题 → 历史 SQL）
//! - **observability**: 日志初始化
//! - **ui**: 交互式 REPL 与保存确认

pub mod agents;
pub mod config;
pub mod core;
pub mod database;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod ui;

pub use crate::core::{Pipeline, PipelineError, PipelineResult, PipelineStatus};
