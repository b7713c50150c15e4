//! 各智能体的 system prompt
//!
//! 从 prompts 目录读取 `<agent>.txt`，文件不存在时使用内置默认。
//! 内置默认末尾附带由 schemars 生成的输出 JSON Schema，减少模型输出格式错误。

use std::collections::HashMap;
use std::path::Path;

use schemars::{schema_for, JsonSchema};

/// Schema Linking 输出格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct SchemaLinkingFormat {
    /// 与问题相关的表名
    pub tables: Vec<String>,
    /// 表名 → 相关列名
    pub columns: HashMap<String, Vec<String>>,
    /// 连接关系，如 {"from": "Album.ArtistId", "to": "Artist.ArtistId"}
    pub relationships: Vec<RelationshipFormat>,
    /// 问题中无法确定的地方
    pub ambiguities: Vec<String>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct RelationshipFormat {
    pub from: String,
    pub to: String,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct PlanFormat {
    pub intent: String,
    pub steps: Vec<String>,
    pub entities: Vec<String>,
    pub aggregations: Vec<String>,
    pub grouping: Vec<String>,
    pub filters: Vec<String>,
    pub ambiguities: Vec<String>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct VerificationFormat {
    pub is_valid: bool,
    pub issues: Vec<String>,
    /// critical 或 non_critical
    pub severity: String,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct CorrectionFormat {
    /// correct_sql 或 refuse
    pub action: String,
    /// action 为 correct_sql 时给出的单条 SQL
    pub corrected_sql: Option<String>,
    pub reasoning: String,
}

fn schema_json<T: JsonSchema>() -> String {
    let schema = schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

fn with_format(instructions: &str, schema: String) -> String {
    format!(
        "{}\n\nRespond with a single JSON object matching this JSON Schema:\n{}",
        instructions, schema
    )
}

fn default_schema_linking() -> String {
    with_format(
        "You are a schema linking agent for a SQLite database. Given the full database schema and a question, \
         select only the tables, columns and join relationships needed to answer it. \
         Never invent tables or columns that are not in the schema. List anything unclear under ambiguities.",
        schema_json::<SchemaLinkingFormat>(),
    )
}

fn default_planning() -> String {
    with_format(
        "You are a query planning agent. Using only the approved tables and columns, describe step by step \
         how to answer the question: the entities involved, filters, aggregations and grouping. \
         Do not write SQL.",
        schema_json::<PlanFormat>(),
    )
}

fn default_sql_generation() -> String {
    "You are a SQLite expert. Write exactly one SQLite SELECT statement that implements the plan, \
     using only the approved tables and columns. Output only the SQL, ending with a semicolon. \
     No explanations, no markdown, no second statement."
        .to_string()
}

fn default_verification() -> String {
    with_format(
        "You are a SQL verification agent. Check the SQL against the schema context and the plan without \
         executing it: unknown tables or columns, wrong joins, missing GROUP BY, filters that contradict the plan. \
         Mark the SQL invalid only for real defects.",
        schema_json::<VerificationFormat>(),
    )
}

fn default_correction() -> String {
    with_format(
        "You are a SQL correction agent. Fix the SQL so that it resolves the verification issues and the \
         execution feedback while still implementing the plan. Use action \"correct_sql\" with exactly one \
         SQLite statement in corrected_sql. If the SQL cannot be fixed with the approved schema, use action \
         \"refuse\" and explain why in reasoning.",
        schema_json::<CorrectionFormat>(),
    )
}

/// 五个智能体的 system prompt
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSet {
    pub schema_linking: String,
    pub planning: String,
    pub sql_generation: String,
    pub verification: String,
    pub correction: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            schema_linking: default_schema_linking(),
            planning: default_planning(),
            sql_generation: default_sql_generation(),
            verification: default_verification(),
            correction: default_correction(),
        }
    }
}

impl PromptSet {
    /// 依次查找 `<dir>/<name>.txt` 与 `../<dir>/<name>.txt`，找不到则用内置默认
    pub fn load(dir: &Path) -> Self {
        let read = |name: &str, fallback: fn() -> String| -> String {
            let file = format!("{}.txt", name);
            [dir.join(&file), Path::new("..").join(dir).join(&file)]
                .into_iter()
                .find_map(|p| std::fs::read_to_string(p).ok())
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| {
                    tracing::debug!("prompt {} not found in {}, using built-in", name, dir.display());
                    fallback()
                })
        };
        Self {
            schema_linking: read("schema_linking", default_schema_linking),
            planning: read("planning", default_planning),
            sql_generation: read("sql_generation", default_sql_generation),
            verification: read("verification", default_verification),
            correction: read("correction", default_correction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_embed_output_schema() {
        let prompts = PromptSet::default();
        assert!(prompts.verification.contains("\"is_valid\""));
        assert!(prompts.correction.contains("\"corrected_sql\""));
        assert!(prompts.schema_linking.contains("\"relationships\""));
    }

    #[test]
    fn test_files_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("planning.txt"), "custom planner").unwrap();
        std::fs::write(dir.path().join("verification.txt"), "   ").unwrap();

        let prompts = PromptSet::load(dir.path());
        assert_eq!(prompts.planning, "custom planner");
        assert_eq!(prompts.verification, PromptSet::default().verification);
        assert_eq!(prompts.sql_generation, PromptSet::default().sql_generation);
    }
}
