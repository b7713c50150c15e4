//! Planning：把问题与 Schema 上下文转成结构化查询计划
//!
//! 每轮完整重试都会重新规划，并带上此前累积的错误反馈。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::json::{decode_or, Decoded};
use crate::agents::schema_linker::{SchemaContext, UNPARSED_AMBIGUITY};
use crate::agents::{pretty, preview, AgentRuntime};
use crate::llm::LlmError;

/// 查询计划；各列表字段的元素形态由模型决定，因此保留为 JSON 值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub steps: Vec<Value>,
    #[serde(default)]
    pub entities: Vec<Value>,
    #[serde(default)]
    pub aggregations: Vec<Value>,
    #[serde(default)]
    pub grouping: Vec<Value>,
    #[serde(default)]
    pub filters: Vec<Value>,
    #[serde(default)]
    pub ambiguities: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QueryPlan {
    /// 解析失败时的最小可用计划，可直接交给 SQL 生成
    pub fn fallback(question: &str) -> Self {
        Self {
            intent: question.to_string(),
            steps: vec![Value::from("Extract relevant data from schema")],
            ambiguities: vec![Value::from(UNPARSED_AMBIGUITY)],
            ..Self::default()
        }
    }

    pub fn to_prompt_json(&self) -> String {
        pretty(self)
    }
}

pub struct Planner {
    runtime: AgentRuntime,
    system_prompt: String,
}

impl Planner {
    pub fn new(runtime: AgentRuntime, system_prompt: impl Into<String>) -> Self {
        Self {
            runtime,
            system_prompt: system_prompt.into(),
        }
    }

    pub async fn plan(
        &self,
        question: &str,
        context: &SchemaContext,
        error_feedback: &str,
    ) -> Result<Decoded<QueryPlan>, LlmError> {
        let mut user_prompt = format!(
            "SCHEMA CONTEXT (approved tables and columns):\n{}\n\nQUESTION\n{}\n",
            context.to_prompt_json(),
            question
        );
        if !error_feedback.is_empty() {
            user_prompt.push_str(&format!(
                "\nPREVIOUS ATTEMPTS FAILED\n{}\nProduce a different plan that avoids these errors.\n",
                error_feedback
            ));
        }
        user_prompt.push_str("\nReturn JSON only:");

        let raw = self.runtime.ask(&self.system_prompt, &user_prompt).await?;
        let decoded = decode_or(&raw, || QueryPlan::fallback(question));
        if let Some(reason) = decoded.fallback_reason() {
            tracing::warn!(reason = %reason, raw = %preview(&raw), "planning returned invalid JSON");
        }
        Ok(decoded)
    }
}
