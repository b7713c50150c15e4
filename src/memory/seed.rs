//! 种子数据：把预置的 (question, sql) 写入查询记忆，id 为 `seed_<n>`，重复导入会覆盖同 id 记录

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::memory::{MemoryError, SqliteQueryMemory};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedExample {
    pub question: String,
    pub sql: String,
}

/// 读取 JSON 数组形式的种子文件
pub fn load_seed_file(path: impl AsRef<Path>) -> Result<Vec<SeedExample>, MemoryError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// 逐条写入；任一条嵌入失败即中止，已写入的保留
pub async fn seed_memory(
    memory: &SqliteQueryMemory,
    examples: &[SeedExample],
) -> Result<usize, MemoryError> {
    for (idx, example) in examples.iter().enumerate() {
        memory
            .upsert(&format!("seed_{}", idx), &example.question, &example.sql)
            .await?;
        tracing::debug!(idx, question = %example.question, "seeded");
    }
    Ok(examples.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::llm::EmbeddingProvider;

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        async fn embed(&self, text: &str) -> Option<Vec<f32>> {
            Some(vec![text.len() as f32, 1.0])
        }
    }

    #[tokio::test]
    async fn test_seed_file_is_loaded_and_reseeding_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let seed_path = dir.path().join("seed.json");
        std::fs::write(
            &seed_path,
            r#"[
                {"question": "List all artists", "sql": "SELECT Name FROM Artist;"},
                {"question": "How many tracks are there?", "sql": "SELECT COUNT(*) FROM Track;"}
            ]"#,
        )
        .unwrap();

        let examples = load_seed_file(&seed_path).unwrap();
        assert_eq!(examples.len(), 2);

        let memory =
            SqliteQueryMemory::open(dir.path().join("memory.db"), Arc::new(LengthEmbedder), 0.8)
                .unwrap();
        assert_eq!(seed_memory(&memory, &examples).await.unwrap(), 2);
        assert_eq!(seed_memory(&memory, &examples).await.unwrap(), 2);
        assert_eq!(memory.len().unwrap(), 2);
    }

    #[test]
    fn test_malformed_seed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{\"question\": 1}").unwrap();
        assert!(matches!(load_seed_file(&path), Err(MemoryError::Json(_))));
        assert!(matches!(
            load_seed_file(dir.path().join("missing.json")),
            Err(MemoryError::Io(_))
        ));
    }
}
