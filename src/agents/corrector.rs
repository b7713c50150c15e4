//! Correction：根据校验问题或执行错误修复 SQL，或拒绝修复并给出理由
//!
//! 以下情况一律视为拒绝：action 不是 correct_sql、缺少 corrected_sql、回复无法解析、
//! 修正后的 SQL 无法抽取出唯一一条语句。

use serde::{Deserialize, Serialize};

use crate::agents::json::{decode_or, Decoded};
use crate::agents::planner::QueryPlan;
use crate::agents::schema_linker::SchemaContext;
use crate::agents::sql_extract::clean_sql;
use crate::agents::verifier::VerificationResult;
use crate::agents::{pretty, preview, AgentRuntime};
use crate::llm::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionAction {
    CorrectSql,
    #[serde(other)]
    Refuse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub action: CorrectionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl CorrectionResult {
    pub fn refuse(reasoning: impl Into<String>) -> Self {
        Self {
            action: CorrectionAction::Refuse,
            corrected_sql: None,
            reasoning: Some(reasoning.into()),
        }
    }

    /// 被接受的修正 SQL；拒绝时为 None
    pub fn accepted_sql(&self) -> Option<&str> {
        match self.action {
            CorrectionAction::CorrectSql => self.corrected_sql.as_deref(),
            CorrectionAction::Refuse => None,
        }
    }

    pub fn reasoning_text(&self) -> &str {
        self.reasoning.as_deref().unwrap_or("no reasoning given")
    }

    /// 统一为「接受且 SQL 可用」或「拒绝」两种形态
    fn settle(mut self) -> Self {
        if self.action != CorrectionAction::CorrectSql {
            return self;
        }
        let Some(raw_sql) = self.corrected_sql.take() else {
            return Self::refuse(
                self.reasoning
                    .unwrap_or_else(|| "correction did not include corrected_sql".to_string()),
            );
        };
        match clean_sql(&raw_sql) {
            Ok(sql) => {
                self.corrected_sql = Some(sql);
                self
            }
            Err(e) => Self::refuse(format!("corrected SQL is unusable: {}", e)),
        }
    }
}

pub struct Corrector {
    runtime: AgentRuntime,
    system_prompt: String,
}

impl Corrector {
    pub fn new(runtime: AgentRuntime, system_prompt: impl Into<String>) -> Self {
        Self {
            runtime,
            system_prompt: system_prompt.into(),
        }
    }

    pub async fn correct(
        &self,
        context: &SchemaContext,
        plan: &QueryPlan,
        sql: &str,
        verification: Option<&VerificationResult>,
        execution_error: Option<&str>,
    ) -> Result<Decoded<CorrectionResult>, LlmError> {
        let issues = verification
            .map(pretty)
            .unwrap_or_else(|| "None".to_string());
        let user_prompt = format!(
            "SCHEMA CONTEXT\n{}\n\nQUERY PLAN\n{}\n\nGENERATED SQL\n{}\n\nVERIFICATION ISSUES\n{}\n\nEXECUTION FEEDBACK\n{}\n\nReturn JSON only:",
            context.to_prompt_json(),
            plan.to_prompt_json(),
            sql,
            issues,
            execution_error.unwrap_or("None"),
        );
        let raw = self.runtime.ask(&self.system_prompt, &user_prompt).await?;
        let decoded = decode_or(&raw, || {
            CorrectionResult::refuse("correction agent returned an unparseable response")
        });
        if let Some(reason) = decoded.fallback_reason() {
            tracing::warn!(reason = %reason, raw = %preview(&raw), "correction returned invalid JSON");
        }
        Ok(decoded.map(CorrectionResult::settle))
    }
}
