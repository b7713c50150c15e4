//! Schema Linking：从整库结构中挑出与问题相关的表、列与关系
//!
//! 模型输出的键名并不稳定（`tables` / `relevant_tables`、`columns` / `relevant_columns`、
//! `relationships` / `relations`），normalize_schema_context 将其统一为 SchemaContext，下游只读取规范形态。
//! 规范键优先于别名；其余键原样保留在 extra 中。对规范形态再次归一化结果不变。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::json::{extract_json, Decoded};
use crate::agents::{pretty, preview, AgentRuntime};
use crate::database::DatabaseSchema;
use crate::llm::LlmError;

pub const UNPARSED_AMBIGUITY: &str = "Unable to parse agent response";

/// 未限定表名的列在多表上下文中的归属键
const UNQUALIFIED: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
}

/// 与问题相关的 Schema 子集（规范形态）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaContext {
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub columns: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub ambiguities: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SchemaContext {
    /// 解析失败时的兜底：空上下文 + 一条歧义说明
    pub fn unparsed() -> Self {
        Self {
            ambiguities: vec![UNPARSED_AMBIGUITY.to_string()],
            ..Self::default()
        }
    }

    /// prompt 中使用的 JSON 文本
    pub fn to_prompt_json(&self) -> String {
        pretty(self)
    }
}

/// 取规范键，不存在时取别名；两者都从 map 中移除
fn take_with_alias(map: &mut Map<String, Value>, canonical: &str, alias: &str) -> Option<Value> {
    let canonical_value = map.remove(canonical);
    let alias_value = map.remove(alias);
    canonical_value.or(alias_value)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Null => None,
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(obj) => obj
                    .get("name")
                    .or_else(|| obj.get("table"))
                    .and_then(value_to_string),
                other => value_to_string(other),
            })
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(other) => value_to_string(&other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn normalize_columns(value: Option<Value>, tables: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut columns: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let default_table = match tables {
        [only] => only.clone(),
        _ => UNQUALIFIED.to_string(),
    };
    let mut add = |table: String, column: String| {
        push_unique(columns.entry(table).or_default(), column);
    };

    match value {
        Some(Value::Object(obj)) => {
            for (table, cols) in obj {
                for col in string_list(Some(cols)) {
                    add(table.clone(), col);
                }
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::Object(obj) => {
                        let table = obj
                            .get("table")
                            .and_then(value_to_string)
                            .unwrap_or_else(|| default_table.clone());
                        let cols = obj
                            .get("columns")
                            .or_else(|| obj.get("column"))
                            .or_else(|| obj.get("name"))
                            .cloned();
                        for col in string_list(cols) {
                            add(table.clone(), col);
                        }
                    }
                    other => {
                        let Some(text) = value_to_string(&other) else {
                            continue;
                        };
                        match text.split_once('.') {
                            Some((table, col)) => add(table.to_string(), col.to_string()),
                            None => add(default_table.clone(), text),
                        }
                    }
                }
            }
        }
        _ => {}
    }
    columns
}

fn parse_relationship_text(text: &str) -> Option<Relationship> {
    for sep in ["->", "=", "<->"] {
        if let Some((from, to)) = text.split_once(sep) {
            let (from, to) = (from.trim().trim_end_matches('<'), to.trim().trim_start_matches('>'));
            if !from.is_empty() && !to.is_empty() {
                return Some(Relationship {
                    from: from.trim().to_string(),
                    to: to.trim().to_string(),
                });
            }
        }
    }
    None
}

fn normalize_relationships(value: Option<Value>) -> Vec<Relationship> {
    let items = match value {
        Some(Value::Array(items)) => items,
        Some(single @ (Value::Object(_) | Value::String(_))) => vec![single],
        _ => return Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(obj) => {
                let pick = |keys: &[&str]| {
                    keys.iter()
                        .find_map(|k| obj.get(*k).and_then(value_to_string))
                };
                let from = pick(&["from", "source", "left"])?;
                let to = pick(&["to", "target", "right"])?;
                Some(Relationship { from, to })
            }
            Value::String(text) => parse_relationship_text(&text),
            _ => None,
        })
        .collect()
}

/// 把模型输出归一化为 SchemaContext；不会失败，缺失字段为空
pub fn normalize_schema_context(raw: Value) -> SchemaContext {
    let mut map = match raw {
        Value::Object(map) => map,
        _ => return SchemaContext::default(),
    };

    let mut tables = Vec::new();
    for table in string_list(take_with_alias(&mut map, "tables", "relevant_tables")) {
        push_unique(&mut tables, table);
    }
    let columns = normalize_columns(
        take_with_alias(&mut map, "columns", "relevant_columns"),
        &tables,
    );
    let relationships =
        normalize_relationships(take_with_alias(&mut map, "relationships", "relations"));
    let ambiguities = match map.remove("ambiguities") {
        Some(Value::String(s)) => value_to_string(&Value::String(s)).into_iter().collect(),
        other => string_list(other),
    };

    SchemaContext {
        tables,
        columns,
        relationships,
        ambiguities,
        extra: map,
    }
}

/// Schema Linking 智能体
pub struct SchemaLinker {
    runtime: AgentRuntime,
    system_prompt: String,
}

impl SchemaLinker {
    pub fn new(runtime: AgentRuntime, system_prompt: impl Into<String>) -> Self {
        Self {
            runtime,
            system_prompt: system_prompt.into(),
        }
    }

    pub async fn link(
        &self,
        question: &str,
        schema: &DatabaseSchema,
    ) -> Result<Decoded<SchemaContext>, LlmError> {
        let user_prompt = format!(
            "{}\nQUESTION\n{}\n\nReturn JSON only:",
            schema.describe(),
            question
        );
        let raw = self.runtime.ask(&self.system_prompt, &user_prompt).await?;
        Ok(match extract_json(&raw) {
            Ok(value) => Decoded::Parsed(normalize_schema_context(value)),
            Err(reason) => {
                tracing::warn!(reason = %reason, raw = %preview(&raw), "schema linking returned invalid JSON");
                Decoded::Fallback {
                    value: SchemaContext::unparsed(),
                    reason,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aliases_are_mapped_to_canonical_keys() {
        let ctx = normalize_schema_context(json!({
            "relevant_tables": ["Album", "Artist"],
            "relevant_columns": {"Album": ["Title", "ArtistId"], "Artist": ["ArtistId", "Name"]},
            "relations": [{"from": "Album.ArtistId", "to": "Artist.ArtistId"}],
            "ambiguities": []
        }));
        assert_eq!(ctx.tables, vec!["Album", "Artist"]);
        assert_eq!(ctx.columns["Artist"], vec!["ArtistId", "Name"]);
        assert_eq!(
            ctx.relationships,
            vec![Relationship {
                from: "Album.ArtistId".into(),
                to: "Artist.ArtistId".into()
            }]
        );
        assert!(ctx.extra.is_empty());
    }

    #[test]
    fn test_canonical_key_wins_and_alias_is_dropped() {
        let ctx = normalize_schema_context(json!({
            "tables": ["Track"],
            "relevant_tables": ["Genre"],
        }));
        assert_eq!(ctx.tables, vec!["Track"]);
        assert!(!ctx.extra.contains_key("relevant_tables"));
    }

    #[test]
    fn test_missing_keys_default_to_empty_and_extras_survive() {
        let ctx = normalize_schema_context(json!({"reasoning": "only one table needed"}));
        assert!(ctx.tables.is_empty());
        assert!(ctx.columns.is_empty());
        assert!(ctx.relationships.is_empty());
        assert_eq!(ctx.extra["reasoning"], json!("only one table needed"));

        assert_eq!(normalize_schema_context(json!([1, 2])), SchemaContext::default());
    }

    #[test]
    fn test_qualified_column_list_and_text_relationships() {
        let ctx = normalize_schema_context(json!({
            "tables": ["Invoice", "Customer"],
            "columns": ["Invoice.Total", "Customer.Country", "Invoice.CustomerId"],
            "relationships": ["Invoice.CustomerId = Customer.CustomerId"]
        }));
        assert_eq!(ctx.columns["Invoice"], vec!["Total", "CustomerId"]);
        assert_eq!(ctx.columns["Customer"], vec!["Country"]);
        assert_eq!(ctx.relationships[0].from, "Invoice.CustomerId");
        assert_eq!(ctx.relationships[0].to, "Customer.CustomerId");
    }

    #[test]
    fn test_unqualified_columns_attach_to_single_table() {
        let ctx = normalize_schema_context(json!({
            "tables": "Artist",
            "columns": ["Name"],
            "relationships": [{"source": "a", "target": "b"}]
        }));
        assert_eq!(ctx.columns["Artist"], vec!["Name"]);
        assert_eq!(ctx.relationships[0].to, "b");
    }

    #[test]
    fn test_normalization_is_a_fixed_point() {
        let inputs = [
            json!({
                "relevant_tables": ["Album", "Artist", "Album"],
                "relevant_columns": ["Album.Title", "Name"],
                "relations": ["Album.ArtistId -> Artist.ArtistId"],
                "ambiguities": "which artist?",
                "confidence": 0.7
            }),
            json!({}),
            json!({"tables": [{"name": "Track"}], "columns": {"Track": "Name, Milliseconds"}}),
        ];
        for input in inputs {
            let once = normalize_schema_context(input);
            let twice = normalize_schema_context(serde_json::to_value(&once).unwrap());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_unparsed_fallback_has_ambiguity() {
        let ctx = SchemaContext::unparsed();
        assert!(ctx.tables.is_empty());
        assert_eq!(ctx.ambiguities, vec![UNPARSED_AMBIGUITY]);
    }
}
