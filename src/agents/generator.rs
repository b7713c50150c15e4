//! SQL 生成：按计划写出一条 SQLite 语句
//!
//! 可选地带上查询记忆中的相似示例与此前的失败原因。回复经 clean_sql 抽取，
//! 多语句或找不到语句属于生成缺陷，由编排器转为反馈并进入下一轮。

use thiserror::Error;

use crate::agents::planner::QueryPlan;
use crate::agents::schema_linker::SchemaContext;
use crate::agents::sql_extract::{clean_sql, SqlExtractError};
use crate::agents::{preview, AgentRuntime};
use crate::llm::LlmError;
use crate::memory::MemoryHit;

#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("{error}")]
    Extract {
        #[source]
        error: SqlExtractError,
        raw: String,
    },
}

pub struct SqlGenerator {
    runtime: AgentRuntime,
    system_prompt: String,
}

impl SqlGenerator {
    pub fn new(runtime: AgentRuntime, system_prompt: impl Into<String>) -> Self {
        Self {
            runtime,
            system_prompt: system_prompt.into(),
        }
    }

    pub async fn generate(
        &self,
        question: &str,
        context: &SchemaContext,
        plan: &QueryPlan,
        example: Option<&MemoryHit>,
        error_feedback: &str,
    ) -> Result<String, GenerationError> {
        let mut user_prompt = format!(
            "APPROVED TABLES AND COLUMNS:\n{}\n\nPLAN TO IMPLEMENT:\n{}\n\nQUESTION\n{}\n",
            context.to_prompt_json(),
            plan.to_prompt_json(),
            question
        );
        if let Some(hit) = example {
            user_prompt.push_str(&format!(
                "\nSIMILAR SOLVED QUESTION (similarity {:.2})\nQuestion: {}\nSQL: {}\n",
                hit.similarity, hit.question, hit.sql
            ));
        }
        if !error_feedback.is_empty() {
            user_prompt.push_str(&format!("\nPREVIOUS ERRORS\n{}\n", error_feedback));
        }
        user_prompt.push_str("\nWrite exactly one SQLite statement that implements this plan:");

        let raw = self.runtime.ask(&self.system_prompt, &user_prompt).await?;
        clean_sql(&raw).map_err(|error| {
            tracing::warn!(error = %error, raw = %preview(&raw), "sql generation produced unusable output");
            GenerationError::Extract { error, raw }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::llm::MockLlmClient;

    fn generator(llm: Arc<MockLlmClient>) -> SqlGenerator {
        SqlGenerator::new(AgentRuntime::new(llm, 0.0, Duration::from_secs(5)), "gen")
    }

    #[tokio::test]
    async fn test_fallback_plan_is_valid_input() {
        let llm = Arc::new(MockLlmClient::always("```sql\nSELECT * FROM Artist\n```"));
        let sql = generator(llm.clone())
            .generate(
                "List all artists",
                &SchemaContext::unparsed(),
                &QueryPlan::fallback("List all artists"),
                None,
                "",
            )
            .await
            .unwrap();
        assert_eq!(sql, "SELECT * FROM Artist;");
        assert!(llm.prompts()[0].contains("Extract relevant data from schema"));
    }

    #[tokio::test]
    async fn test_memory_example_is_included() {
        let llm = Arc::new(MockLlmClient::always("SELECT COUNT(*) FROM Track;"));
        let hit = MemoryHit {
            question: "How many tracks are there?".into(),
            sql: "SELECT COUNT(*) FROM Track;".into(),
            similarity: 0.93,
        };
        generator(llm.clone())
            .generate("Count the tracks", &SchemaContext::default(), &QueryPlan::default(), Some(&hit), "")
            .await
            .unwrap();
        assert!(llm.prompts()[0].contains("SIMILAR SOLVED QUESTION (similarity 0.93)"));
    }

    #[tokio::test]
    async fn test_multiple_statements_is_extract_error() {
        let llm = Arc::new(MockLlmClient::always("SELECT 1;\nSELECT 2;"));
        let err = generator(llm)
            .generate("q", &SchemaContext::default(), &QueryPlan::default(), None, "")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Extract {
                error: SqlExtractError::MultipleStatements,
                ..
            }
        ));
    }
}
