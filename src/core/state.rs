//! 状态快照：每轮完整流水线一个不可变 Attempt，最终汇总为 PipelineResult
//!
//! 各层循环返回新的结果值，而不是在嵌套作用域里改写共享的 sql / feedback 变量。

use serde::Serialize;

use crate::agents::{QueryPlan, VerificationResult};
use crate::database::ExecutionResult;
use crate::memory::MemoryHit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    Failed,
}

/// 累积的失败原因；每条带轮次前缀，整段交给下一轮的规划与生成
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorFeedback {
    entries: Vec<String>,
}

impl ErrorFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, attempt: usize, reason: impl AsRef<str>) {
        self.entries
            .push(format!("Attempt {}: {}", attempt, reason.as_ref()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn render(&self) -> String {
        self.entries.join("\n")
    }
}

/// 一轮完整流水线（规划 → 生成 → 校验/纠错 → 执行）的快照
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub number: usize,
    pub plan: QueryPlan,
    /// 计划是否为解析失败后的兜底
    pub plan_fallback: bool,
    /// 本轮最后一次使用的 SQL；生成失败时为 None
    pub sql: Option<String>,
    pub verification: Option<VerificationResult>,
    pub verification_corrections: usize,
    pub execution_corrections: usize,
    pub execution_attempts: usize,
    pub execution: Option<ExecutionResult>,
    /// 本轮写入的反馈（按顺序）
    pub feedback: Vec<String>,
}

impl Attempt {
    pub fn corrections(&self) -> usize {
        self.verification_corrections + self.execution_corrections
    }

    pub fn succeeded(&self) -> bool {
        self.execution.as_ref().is_some_and(|e| e.success)
    }
}

/// 一个问题的最终结果（成功或失败都会返回）
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub question: String,
    /// 成功时为最终 SQL；失败时为最后尝试的 SQL（如有）
    pub sql: Option<String>,
    /// 成功时为执行结果；失败时为最后一次执行结果（如有）
    pub execution: Option<ExecutionResult>,
    pub pipeline_attempts: usize,
    /// 所有轮次的执行次数之和
    pub execution_attempts: usize,
    pub corrections: usize,
    pub error_feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_example: Option<MemoryHit>,
    pub memory_saved: bool,
    pub attempts: Vec<Attempt>,
}

impl PipelineResult {
    pub(crate) fn from_attempts(
        question: &str,
        attempts: Vec<Attempt>,
        feedback: &ErrorFeedback,
        memory_example: Option<MemoryHit>,
    ) -> Self {
        let last = attempts.last();
        let status = if last.is_some_and(Attempt::succeeded) {
            PipelineStatus::Success
        } else {
            PipelineStatus::Failed
        };
        let sql = attempts.iter().rev().find_map(|a| a.sql.clone());
        let execution = attempts.iter().rev().find_map(|a| a.execution.clone());
        Self {
            status,
            question: question.to_string(),
            sql,
            execution,
            pipeline_attempts: attempts.len(),
            execution_attempts: attempts.iter().map(|a| a.execution_attempts).sum(),
            corrections: attempts.iter().map(Attempt::corrections).sum(),
            error_feedback: feedback.render(),
            memory_example,
            memory_saved: false,
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(number: usize, sql: Option<&str>, execution: Option<ExecutionResult>) -> Attempt {
        Attempt {
            number,
            plan: QueryPlan::default(),
            plan_fallback: false,
            sql: sql.map(str::to_string),
            verification: None,
            verification_corrections: 1,
            execution_corrections: 0,
            execution_attempts: usize::from(execution.is_some()),
            execution,
            feedback: Vec::new(),
        }
    }

    #[test]
    fn test_feedback_accumulates_with_attempt_prefix() {
        let mut feedback = ErrorFeedback::new();
        assert!(feedback.is_empty());
        feedback.record(1, "no such column: Foo");
        feedback.record(2, "multiple statements");
        assert_eq!(feedback.latest(), Some("Attempt 2: multiple statements"));
        assert_eq!(
            feedback.render(),
            "Attempt 1: no such column: Foo\nAttempt 2: multiple statements"
        );
    }

    #[test]
    fn test_failed_result_keeps_last_sql_and_execution() {
        let mut feedback = ErrorFeedback::new();
        feedback.record(2, "generation failed");
        let result = PipelineResult::from_attempts(
            "q",
            vec![
                attempt(1, Some("SELECT 1;"), Some(ExecutionResult::failure("boom"))),
                attempt(2, None, None),
            ],
            &feedback,
            None,
        );
        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(result.sql.as_deref(), Some("SELECT 1;"));
        assert_eq!(result.execution.unwrap().error.as_deref(), Some("boom"));
        assert_eq!(result.pipeline_attempts, 2);
        assert_eq!(result.execution_attempts, 1);
        assert_eq!(result.corrections, 2);
    }

    #[test]
    fn test_success_status_from_last_attempt() {
        let ok = ExecutionResult::from_rows(vec!["n".into()], vec![vec![serde_json::json!(1)]], false);
        let result = PipelineResult::from_attempts(
            "q",
            vec![attempt(1, Some("SELECT 1;"), Some(ok))],
            &ErrorFeedback::new(),
            None,
        );
        assert!(result.is_success());
        assert_eq!(result.error_feedback, "");
    }
}
