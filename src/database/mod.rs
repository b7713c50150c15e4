//! 目标数据库：Schema 提取与 SQL 执行

pub mod executor;
pub mod schema;

pub use executor::{ExecutionResult, SqlExecutor, SqliteExecutor};
pub use schema::{ColumnInfo, DatabaseSchema, ForeignKey, SchemaError, TableInfo};
