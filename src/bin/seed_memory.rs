//! 查询记忆种子工具：把 JSON 种子文件中的 (question, sql) 写入记忆库
//!
//! 用法：`text2sql-seed [seed.json]`，缺省读取配置中的 memory.seed_path。

use std::path::PathBuf;

use anyhow::{bail, Context};
use text2sql::config::{load_config, AppConfig};
use text2sql::llm::create_embedder_from_config;
use text2sql::memory::{load_seed_file, seed_memory, SqliteQueryMemory};
use text2sql::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init(None);
    let config = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let seed_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.memory.seed_path.clone());

    let Some(embedder) = create_embedder_from_config(&config.embedding) else {
        bail!("no embedding provider available; check the [embedding] config section");
    };

    let memory = SqliteQueryMemory::open(
        &config.memory.store_path,
        embedder,
        config.memory.similarity_threshold,
    )
    .context("Failed to open query memory")?;

    let examples = load_seed_file(&seed_path)
        .with_context(|| format!("Failed to read seed file {}", seed_path.display()))?;
    tracing::info!(count = examples.len(), "seeding query memory from {}", seed_path.display());

    let written = seed_memory(&memory, &examples)
        .await
        .context("Seeding failed")?;
    println!(
        "Seeded {} examples into {} ({} records total)",
        written,
        config.memory.store_path.display(),
        memory.len().unwrap_or(written)
    );
    Ok(())
}
