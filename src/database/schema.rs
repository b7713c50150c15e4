//! 目标库 Schema：启动时从 sqlite_master + PRAGMA 读取一次，之后作为不可变值传给编排器
//!
//! describe() 渲染为给 Schema Linking 智能体看的文本（表、列、类型、主键、外键关系）。

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("cannot open database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("schema introspection failed: {0}")]
    Introspection(#[from] rusqlite::Error),

    #[error("database {0} has no tables")]
    Empty(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub primary_key: bool,
    pub not_null: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKey {
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// 便于测试构造：列类型统一记为 declared_type
    pub fn with_column(mut self, name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        self.columns.push(ColumnInfo {
            name: name.into(),
            declared_type: declared_type.into(),
            primary_key: false,
            not_null: false,
        });
        self
    }

    pub fn with_foreign_key(
        mut self,
        from_column: impl Into<String>,
        to_table: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            from_column: from_column.into(),
            to_table: to_table.into(),
            to_column: to_column.into(),
        });
        self
    }
}

/// 整个目标库的结构描述（不可变）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseSchema {
    tables: Vec<TableInfo>,
}

impl DatabaseSchema {
    pub fn new(tables: Vec<TableInfo>) -> Self {
        Self { tables }
    }

    /// 以只读方式打开 SQLite 文件并读取结构
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|source| SchemaError::Open {
                path: path.display().to_string(),
                source,
            })?;
        let schema = Self::from_connection(&conn)?;
        if schema.tables.is_empty() {
            return Err(SchemaError::Empty(path.display().to_string()));
        }
        tracing::info!(tables = schema.tables.len(), "schema loaded from {}", path.display());
        Ok(schema)
    }

    pub fn from_connection(conn: &Connection) -> Result<Self, SchemaError> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<usize, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = load_columns(conn, &name)?;
            let foreign_keys = load_foreign_keys(conn, &name)?;
            tables.push(TableInfo {
                name,
                columns,
                foreign_keys,
            });
        }
        Ok(Self { tables })
    }

    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// 渲染为 prompt 文本
    pub fn describe(&self) -> String {
        let mut text = String::from("DATABASE SCHEMA\n\nTables:\n\n");
        for table in &self.tables {
            text.push_str(&format!("{}:\n", table.name));
            for col in &table.columns {
                let ty = if col.declared_type.is_empty() {
                    "ANY"
                } else {
                    col.declared_type.as_str()
                };
                let pk = if col.primary_key { ", PRIMARY KEY" } else { "" };
                text.push_str(&format!("  - {} ({}{})\n", col.name, ty, pk));
            }
            text.push('\n');
        }

        let relationships: Vec<String> = self
            .tables
            .iter()
            .flat_map(|t| {
                t.foreign_keys.iter().map(move |fk| {
                    format!(
                        "  - {}.{} -> {}.{}",
                        t.name, fk.from_column, fk.to_table, fk.to_column
                    )
                })
            })
            .collect();
        if !relationships.is_empty() {
            text.push_str("Relationships:\n");
            text.push_str(&relationships.join("\n"));
            text.push('\n');
        }
        text
    }
}

fn sqlite_single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn load_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, SchemaError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", sqlite_single_quoted(table)))?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnInfo {
            name: row.get::<usize, String>(1)?,
            declared_type: row.get::<usize, Option<String>>(2)?.unwrap_or_default(),
            not_null: row.get::<usize, i64>(3)? != 0,
            primary_key: row.get::<usize, i64>(5)? > 0,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn load_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKey>, SchemaError> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA foreign_key_list({})",
        sqlite_single_quoted(table)
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok(ForeignKey {
            to_table: row.get::<usize, String>(2)?,
            from_column: row.get::<usize, String>(3)?,
            to_column: row.get::<usize, Option<String>>(4)?.unwrap_or_default(),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chinook_subset(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE Artist (ArtistId INTEGER PRIMARY KEY, Name NVARCHAR(120));
             CREATE TABLE Album (
                AlbumId INTEGER PRIMARY KEY,
                Title NVARCHAR(160) NOT NULL,
                ArtistId INTEGER NOT NULL,
                FOREIGN KEY (ArtistId) REFERENCES Artist (ArtistId)
             );",
        )
        .unwrap();
    }

    #[test]
    fn test_introspects_tables_columns_and_keys() {
        let conn = Connection::open_in_memory().unwrap();
        chinook_subset(&conn);
        let schema = DatabaseSchema::from_connection(&conn).unwrap();

        assert_eq!(schema.table_names(), vec!["Album", "Artist"]);
        let album = &schema.tables()[0];
        assert_eq!(album.columns.len(), 3);
        assert!(album.columns[0].primary_key);
        assert!(album.columns[1].not_null);
        assert_eq!(
            album.foreign_keys,
            vec![ForeignKey {
                from_column: "ArtistId".into(),
                to_table: "Artist".into(),
                to_column: "ArtistId".into(),
            }]
        );
    }

    #[test]
    fn test_describe_lists_columns_and_relationships() {
        let schema = DatabaseSchema::new(vec![
            TableInfo::new("Album")
                .with_column("AlbumId", "INTEGER")
                .with_column("ArtistId", "INTEGER")
                .with_foreign_key("ArtistId", "Artist", "ArtistId"),
            TableInfo::new("Artist").with_column("Name", ""),
        ]);
        let text = schema.describe();
        assert!(text.contains("Album:\n  - AlbumId (INTEGER)"));
        assert!(text.contains("  - Name (ANY)"));
        assert!(text.contains("Album.ArtistId -> Artist.ArtistId"));
    }

    #[test]
    fn test_load_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DatabaseSchema::load(dir.path().join("missing.db")).unwrap_err();
        assert!(matches!(err, SchemaError::Open { .. }));
    }
}
