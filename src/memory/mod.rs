//! 查询记忆：相似问题 → 历史成功 SQL
//!
//! 检索与写入都是尽力而为：嵌入不可用或存储出错时，检索返回 None、写入返回 false，只记录告警。

pub mod seed;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use seed::{load_seed_file, seed_memory, SeedExample};
pub use store::SqliteQueryMemory;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("memory store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("memory io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid seed file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("embedding unavailable")]
    EmbeddingUnavailable,
}

/// 检索命中：相似的历史问题及其 SQL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub question: String,
    pub sql: String,
    pub similarity: f32,
}

/// 查询记忆接口
#[async_trait]
pub trait QueryMemory: Send + Sync {
    /// 相似度达到阈值时返回最相近的一条
    async fn retrieve(&self, question: &str) -> Option<MemoryHit>;

    /// 写入一条成功的 (question, sql)；返回是否写入
    async fn add(&self, question: &str, sql: &str) -> bool;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：未启用查询记忆时使用
#[derive(Debug, Clone, Default)]
pub struct NoopQueryMemory;

#[async_trait]
impl QueryMemory for NoopQueryMemory {
    async fn retrieve(&self, _question: &str) -> Option<MemoryHit> {
        None
    }

    async fn add(&self, _question: &str, _sql: &str) -> bool {
        false
    }

    fn enabled(&self) -> bool {
        false
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_noop_memory() {
        let memory = NoopQueryMemory;
        assert!(memory.retrieve("anything").await.is_none());
        assert!(!memory.add("q", "SELECT 1;").await);
        assert!(!memory.enabled());
    }
}
