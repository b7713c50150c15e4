//! Verification：不执行 SQL，对照 Schema 上下文与计划做静态检查

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::agents::json::{decode_or, Decoded};
use crate::agents::planner::QueryPlan;
use crate::agents::schema_linker::SchemaContext;
use crate::agents::{preview, AgentRuntime};
use crate::llm::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    #[default]
    NonCritical,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawVerification")]
pub struct VerificationResult {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub severity: Severity,
}

/// 模型回复的原始形态；缺少 is_valid 时由 issues 是否为空推出
#[derive(Deserialize)]
struct RawVerification {
    #[serde(default, deserialize_with = "lenient_bool")]
    is_valid: Option<bool>,
    #[serde(default, deserialize_with = "lenient_issues")]
    issues: Vec<String>,
    #[serde(default, deserialize_with = "lenient_severity")]
    severity: Severity,
}

impl From<RawVerification> for VerificationResult {
    fn from(raw: RawVerification) -> Self {
        Self {
            is_valid: raw.is_valid.unwrap_or(raw.issues.is_empty()),
            issues: raw.issues,
            severity: raw.severity,
        }
    }
}

/// 接受布尔值、"true"/"false" 一类字符串与 0/1
fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => Some(b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "valid" => Some(true),
            "false" | "no" | "invalid" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    })
}

fn lenient_severity<'de, D>(deserializer: D) -> Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "critical" => Severity::Critical,
            "non_critical" => Severity::NonCritical,
            _ => Severity::Unknown,
        },
        Value::Null => Severity::default(),
        _ => Severity::Unknown,
    })
}

/// issues 可能是字符串、字符串数组或对象数组
fn lenient_issues<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s),
            Value::Object(obj) => obj
                .get("issue")
                .or_else(|| obj.get("description"))
                .or_else(|| obj.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some(Value::Object(obj).to_string())),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect())
}

impl VerificationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            issues: Vec::new(),
            severity: Severity::NonCritical,
        }
    }

    pub fn issues_text(&self) -> String {
        if self.issues.is_empty() {
            "verification failed without listed issues".to_string()
        } else {
            self.issues.join("; ")
        }
    }
}

pub struct Verifier {
    runtime: AgentRuntime,
    system_prompt: String,
}

impl Verifier {
    pub fn new(runtime: AgentRuntime, system_prompt: impl Into<String>) -> Self {
        Self {
            runtime,
            system_prompt: system_prompt.into(),
        }
    }

    /// 回复无法解析时视为通过，交由执行阶段发现问题
    pub async fn verify(
        &self,
        context: &SchemaContext,
        plan: &QueryPlan,
        sql: &str,
    ) -> Result<Decoded<VerificationResult>, LlmError> {
        let user_prompt = format!(
            "SCHEMA CONTEXT\n{}\n\nQUERY PLAN\n{}\n\nGENERATED SQL\n{}\n\nOUTPUT ONLY VALID JSON. NO MARKDOWN, NO EXTRA TEXT.",
            context.to_prompt_json(),
            plan.to_prompt_json(),
            sql
        );
        let raw = self.runtime.ask(&self.system_prompt, &user_prompt).await?;
        let decoded = decode_or(&raw, VerificationResult::valid);
        if let Some(reason) = decoded.fallback_reason() {
            tracing::warn!(reason = %reason, raw = %preview(&raw), "verification returned invalid JSON");
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_shapes() {
        let result: VerificationResult = serde_json::from_value(json!({
            "is_valid": false,
            "issues": [{"issue": "column Foo does not exist"}, "missing GROUP BY"],
            "severity": "critical"
        }))
        .unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.issues, vec!["column Foo does not exist", "missing GROUP BY"]);
        assert_eq!(result.severity, Severity::Critical);

        let result: VerificationResult =
            serde_json::from_value(json!({"is_valid": false, "issues": "bad join", "severity": "high"}))
                .unwrap();
        assert_eq!(result.issues, vec!["bad join"]);
        assert_eq!(result.severity, Severity::Unknown);

        let result: VerificationResult =
            serde_json::from_value(json!({"is_valid": true, "issues": null, "severity": "Non-Critical"}))
                .unwrap();
        assert!(result.issues.is_empty());
        assert_eq!(result.severity, Severity::NonCritical);
    }

    #[test]
    fn test_string_verdicts() {
        let result: VerificationResult =
            serde_json::from_value(json!({"is_valid": "false", "issues": ["wrong join"]})).unwrap();
        assert!(!result.is_valid);

        let result: VerificationResult =
            serde_json::from_value(json!({"is_valid": "True", "issues": []})).unwrap();
        assert!(result.is_valid);
    }

    #[test]
    fn test_missing_verdict_follows_issues() {
        let result: VerificationResult =
            serde_json::from_value(json!({"issues": ["column Nme does not exist"]})).unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.issues_text(), "column Nme does not exist");

        let decoded = decode_or(
            "```json {\"is_valid\": \"false\", \"issues\": \"bad join\"}```",
            VerificationResult::valid,
        );
        assert!(!decoded.is_fallback());
        assert!(!decoded.value().is_valid);
    }

    #[test]
    fn test_missing_fields_default_to_valid() {
        let result: VerificationResult = serde_json::from_value(json!({})).unwrap();
        assert_eq!(result, VerificationResult::valid());
    }
}
