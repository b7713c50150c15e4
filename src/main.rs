//! Text2SQL - 多智能体 Text-to-SQL 交互式命令行
//!
//! 入口：加载配置、初始化日志、构建流水线，然后进入问答循环。
//! 用法：`text2sql [额外配置文件.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use text2sql::config::load_config;
use text2sql::core::PipelineBuilder;
use text2sql::observability;
use text2sql::ui::{run_repl, stdin_lines, ConsoleConfirmation};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let loaded = load_config(config_path);
    let config = loaded.as_ref().cloned().unwrap_or_default();

    observability::init(config.app.log_dir.as_deref());
    if let Err(e) = &loaded {
        tracing::warn!("Config load failed ({}), using defaults", e);
    }
    tracing::info!(
        database = %config.database.path.display(),
        provider = %config.llm.provider,
        "starting text2sql"
    );

    // REPL 与保存确认共用一个 stdin 读取器
    let input = stdin_lines();
    let pipeline = PipelineBuilder::new(config)
        .with_confirmation(Arc::new(ConsoleConfirmation::new(input.clone())))
        .build()
        .context("Failed to build pipeline")?;

    run_repl(&pipeline, input).await.context("REPL failed")?;
    Ok(())
}
