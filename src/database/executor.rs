//! SQL 执行器
//!
//! 每次执行单独打开连接，在阻塞线程池中运行并施加超时；超时后通过 InterruptHandle 中断查询。
//! 执行从不返回 Err：所有失败都写入 ExecutionResult.error，由编排器交给纠错智能体。
//! 每次执行输出一条结构化审计日志（JSON）。

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::DatabaseSection;

/// 一次执行的结果；rows 为按列顺序的值，data 为列名 → 值的记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub data: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub error: Option<String>,
    /// 超过 max_rows 被截断
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>, truncated: bool) -> Self {
        let data = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
            .collect();
        Self {
            success: true,
            row_count: rows.len(),
            columns,
            rows,
            data,
            error: None,
            truncated,
        }
    }

    /// 失败原因（成功时为空串）
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }
}

/// SQL 执行接口：从不失败，错误写入结果
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> ExecutionResult;
}

/// SQLite 文件执行器
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    path: PathBuf,
    read_only: bool,
    timeout: Duration,
    max_rows: usize,
}

impl SqliteExecutor {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let defaults = DatabaseSection::default();
        Self {
            path: path.as_ref().to_path_buf(),
            read_only: defaults.read_only,
            timeout: Duration::from_secs(defaults.query_timeout_secs),
            max_rows: defaults.max_rows,
        }
    }

    pub fn from_config(cfg: &DatabaseSection) -> Self {
        Self {
            path: cfg.path.clone(),
            read_only: cfg.read_only,
            timeout: Duration::from_secs(cfg.query_timeout_secs),
            max_rows: cfg.max_rows,
        }
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        // 不带 CREATE：库文件不存在时报错而不是建空库
        let flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        Connection::open_with_flags(&self.path, flags | OpenFlags::SQLITE_OPEN_NO_MUTEX)
    }
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    async fn execute(&self, sql: &str) -> ExecutionResult {
        let start = Instant::now();
        let result = match self.open() {
            Ok(conn) => {
                let interrupt = conn.get_interrupt_handle();
                let owned_sql = sql.to_string();
                let max_rows = self.max_rows;
                let task =
                    tokio::task::spawn_blocking(move || run_query(&conn, &owned_sql, max_rows));
                match tokio::time::timeout(self.timeout, task).await {
                    Ok(Ok(Ok(result))) => result,
                    Ok(Ok(Err(e))) => ExecutionResult::failure(e.to_string()),
                    Ok(Err(join_err)) => {
                        ExecutionResult::failure(format!("execution task failed: {}", join_err))
                    }
                    Err(_) => {
                        interrupt.interrupt();
                        ExecutionResult::failure(format!(
                            "query timed out after {}s",
                            self.timeout.as_secs()
                        ))
                    }
                }
            }
            Err(e) => ExecutionResult::failure(format!(
                "cannot open database {}: {}",
                self.path.display(),
                e
            )),
        };

        let audit = json!({
            "event": "sql_audit",
            "ok": result.success,
            "row_count": result.row_count,
            "duration_ms": start.elapsed().as_millis() as u64,
            "error": result.error,
            "sql_preview": sql_preview(sql),
        });
        tracing::info!(audit = %audit, "sql");
        result
    }
}

fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> rusqlite::Result<ExecutionResult> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt.query([])?;
    let mut collected = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if collected.len() >= max_rows {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            values.push(json_value_from_sql(row.get::<usize, SqlValue>(index)?));
        }
        collected.push(values);
    }
    Ok(ExecutionResult::from_rows(columns, collected, truncated))
}

fn json_value_from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => json!(v),
        SqlValue::Real(v) => json!(v),
        SqlValue::Text(v) => json!(v),
        SqlValue::Blob(bytes) => json!(bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>()),
    }
}

fn sql_preview(sql: &str) -> String {
    let one_line = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if one_line.chars().count() > 200 {
        format!("{}...", one_line.chars().take(200).collect::<String>())
    } else {
        one_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Artist (ArtistId INTEGER PRIMARY KEY, Name TEXT);
             INSERT INTO Artist (Name) VALUES ('AC/DC'), ('Accept'), ('Aerosmith');",
        )
        .unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_select_returns_rows_and_records() {
        let (_dir, path) = sample_db();
        let exec = SqliteExecutor::new(&path);
        let result = exec
            .execute("SELECT ArtistId, Name FROM Artist ORDER BY ArtistId;")
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.columns, vec!["ArtistId", "Name"]);
        assert_eq!(result.row_count, 3);
        assert_eq!(result.rows[0], vec![json!(1), json!("AC/DC")]);
        assert_eq!(result.data[2]["Name"], json!("Aerosmith"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_engine_error_is_captured() {
        let (_dir, path) = sample_db();
        let result = SqliteExecutor::new(&path)
            .execute("SELECT Missing FROM Artist;")
            .await;

        assert!(!result.success);
        assert_eq!(result.row_count, 0);
        assert!(result.error_text().contains("Missing"));
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let (_dir, path) = sample_db();
        let result = SqliteExecutor::new(&path)
            .execute("DELETE FROM Artist;")
            .await;
        assert!(!result.success);

        let writable = SqliteExecutor::new(&path).with_read_only(false);
        assert!(writable.execute("DELETE FROM Artist WHERE ArtistId = 1;").await.success);
    }

    #[tokio::test]
    async fn test_max_rows_truncates() {
        let (_dir, path) = sample_db();
        let result = SqliteExecutor::new(&path)
            .with_max_rows(2)
            .execute("SELECT Name FROM Artist;")
            .await;
        assert!(result.success);
        assert_eq!(result.row_count, 2);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_missing_database_is_a_failure_result() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteExecutor::new(dir.path().join("nope.db"))
            .execute("SELECT 1;")
            .await;
        assert!(!result.success);
        assert!(result.error_text().contains("cannot open database"));
    }
}
