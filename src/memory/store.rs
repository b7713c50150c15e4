//! SQLite 持久化的查询记忆
//!
//! 每条记录保存问题、SQL 与问题嵌入（小端 f32 BLOB）。检索时全表扫描计算余弦相似度，
//! 取最高分且不低于阈值的一条。只追加，不做去重。

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};

use crate::llm::EmbeddingProvider;
use crate::memory::{cosine_similarity, MemoryError, MemoryHit, QueryMemory};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS query_memory (
    id TEXT PRIMARY KEY,
    question TEXT NOT NULL,
    sql TEXT NOT NULL,
    embedding BLOB NOT NULL,
    created_at TEXT NOT NULL
)";

pub struct SqliteQueryMemory {
    db: Mutex<Connection>,
    embedder: Arc<dyn EmbeddingProvider>,
    threshold: f32,
}

impl SqliteQueryMemory {
    /// 打开（必要时创建）存储文件
    pub fn open(
        path: impl AsRef<Path>,
        embedder: Arc<dyn EmbeddingProvider>,
        threshold: f32,
    ) -> Result<Self, MemoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute(CREATE_TABLE, [])?;
        tracing::info!("query memory opened at {}", path.display());
        Ok(Self {
            db: Mutex::new(conn),
            embedder,
            threshold,
        })
    }

    pub fn len(&self) -> Result<usize, MemoryError> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = db.query_row("SELECT COUNT(*) FROM query_memory", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, MemoryError> {
        Ok(self.len()? == 0)
    }

    /// 以固定 id 写入（重复 id 覆盖），种子数据使用
    pub async fn upsert(&self, id: &str, question: &str, sql: &str) -> Result<(), MemoryError> {
        let embedding = self
            .embedder
            .embed(question)
            .await
            .ok_or(MemoryError::EmbeddingUnavailable)?;
        self.write_record(id, question, sql, &embedding, true)
    }

    fn write_record(
        &self,
        id: &str,
        question: &str,
        sql: &str,
        embedding: &[f32],
        replace: bool,
    ) -> Result<(), MemoryError> {
        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        db.execute(
            &format!(
                "{} INTO query_memory (id, question, sql, embedding, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                verb
            ),
            params![
                id,
                question,
                sql,
                encode_embedding(embedding),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn best_match(&self, query: &[f32]) -> Result<Option<MemoryHit>, MemoryError> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = db.prepare("SELECT question, sql, embedding FROM query_memory")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<usize, String>(0)?,
                row.get::<usize, String>(1)?,
                row.get::<usize, Vec<u8>>(2)?,
            ))
        })?;

        let mut best: Option<MemoryHit> = None;
        for row in rows {
            let (question, sql, blob) = row?;
            let similarity = cosine_similarity(query, &decode_embedding(&blob));
            if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                best = Some(MemoryHit {
                    question,
                    sql,
                    similarity,
                });
            }
        }
        Ok(best)
    }
}

fn new_record_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("qmem_{}_{}", &hex[..8], Utc::now().format("%Y%m%d%H%M%S"))
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[async_trait]
impl QueryMemory for SqliteQueryMemory {
    async fn retrieve(&self, question: &str) -> Option<MemoryHit> {
        let embedding = self.embedder.embed(question).await?;
        match self.best_match(&embedding) {
            Ok(Some(hit)) if hit.similarity >= self.threshold => {
                tracing::info!(similarity = hit.similarity, similar = %hit.question, "query memory hit");
                Some(hit)
            }
            Ok(Some(hit)) => {
                tracing::info!(
                    highest = hit.similarity,
                    threshold = self.threshold,
                    "no similar query in memory"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("query memory retrieval failed: {}", e);
                None
            }
        }
    }

    async fn add(&self, question: &str, sql: &str) -> bool {
        let Some(embedding) = self.embedder.embed(question).await else {
            tracing::warn!("could not embed question, skipping query memory write");
            return false;
        };
        let id = new_record_id();
        match self.write_record(&id, question, sql, &embedding, false) {
            Ok(()) => {
                tracing::info!(id = %id, "added query to memory");
                true
            }
            Err(e) => {
                tracing::warn!("could not add to query memory: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 按固定词表统计词频的嵌入
    struct VocabEmbedder;

    const VOCAB: [&str; 6] = ["artists", "albums", "tracks", "how", "many", "list"];

    #[async_trait]
    impl EmbeddingProvider for VocabEmbedder {
        async fn embed(&self, text: &str) -> Option<Vec<f32>> {
            let lower = text.to_lowercase();
            Some(
                VOCAB
                    .iter()
                    .map(|w| lower.split_whitespace().filter(|t| t.trim_matches('?') == *w).count() as f32)
                    .collect(),
            )
        }
    }

    struct UnavailableEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnavailableEmbedder {
        async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
            None
        }
    }

    fn open(dir: &tempfile::TempDir, embedder: Arc<dyn EmbeddingProvider>) -> SqliteQueryMemory {
        SqliteQueryMemory::open(dir.path().join("mem/memory.db"), embedder, 0.8).unwrap()
    }

    #[tokio::test]
    async fn test_add_then_retrieve_similar() {
        let dir = tempfile::tempdir().unwrap();
        let memory = open(&dir, Arc::new(VocabEmbedder));
        assert!(memory.add("How many tracks?", "SELECT COUNT(*) FROM Track;").await);
        assert!(memory.add("List artists", "SELECT Name FROM Artist;").await);
        assert_eq!(memory.len().unwrap(), 2);

        let hit = memory.retrieve("how many tracks").await.unwrap();
        assert_eq!(hit.sql, "SELECT COUNT(*) FROM Track;");
        assert!(hit.similarity > 0.99);

        assert!(memory.retrieve("list albums").await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_embedding_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let memory = open(&dir, Arc::new(UnavailableEmbedder));
        assert!(!memory.add("List artists", "SELECT Name FROM Artist;").await);
        assert!(memory.retrieve("List artists").await.is_none());
        assert!(memory.is_empty().unwrap());
        assert!(matches!(
            memory.upsert("seed_0", "q", "SELECT 1;").await,
            Err(MemoryError::EmbeddingUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_records_persist_and_upsert_replaces() {
        let dir = tempfile::tempdir().unwrap();
        {
            let memory = open(&dir, Arc::new(VocabEmbedder));
            memory.upsert("seed_0", "List artists", "SELECT * FROM Artist;").await.unwrap();
            memory.upsert("seed_0", "List artists", "SELECT Name FROM Artist;").await.unwrap();
        }
        let memory = open(&dir, Arc::new(VocabEmbedder));
        assert_eq!(memory.len().unwrap(), 1);
        assert_eq!(
            memory.retrieve("list artists").await.unwrap().sql,
            "SELECT Name FROM Artist;"
        );
    }

    #[test]
    fn test_embedding_blob_layout() {
        let v = vec![1.5f32, -2.0, 0.0];
        assert_eq!(encode_embedding(&v).len(), 12);
        assert_eq!(decode_embedding(&encode_embedding(&v)), v);
        assert!(new_record_id().starts_with("qmem_"));
    }
}
