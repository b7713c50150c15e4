//! 渲染：过程事件 → 单行进度文本，最终结果 → JSON

use serde_json::{json, Value};

use crate::core::{CorrectionTrigger, PipelineEvent, PipelineResult};

/// 结果中最多展示的行数
const MAX_PREVIEW_ROWS: usize = 20;

pub fn render_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::Stage { stage, attempt } if *attempt > 0 => {
            format!("  [{}] {}...", attempt, stage.label())
        }
        PipelineEvent::Stage { stage, .. } => format!("  {}...", stage.label()),
        PipelineEvent::MemoryHit {
            question,
            similarity,
        } => format!(
            "  found similar query in memory (similarity {:.2}): '{}'",
            similarity, question
        ),
        PipelineEvent::MemoryMiss => "  no similar query in memory".to_string(),
        PipelineEvent::Warning { stage, reason } => {
            format!("  warning: {} response unusable ({}), using fallback", stage.label(), reason)
        }
        PipelineEvent::Verification {
            round,
            is_valid,
            issues,
            ..
        } => {
            if *is_valid {
                format!("  verification #{} passed", round)
            } else {
                format!("  verification #{} failed: {}", round, issues.join("; "))
            }
        }
        PipelineEvent::Correction {
            trigger,
            accepted,
            reasoning,
            ..
        } => {
            let cause = match trigger {
                CorrectionTrigger::Verification => "verification",
                CorrectionTrigger::Execution => "execution error",
            };
            if *accepted {
                format!("  corrected SQL after {}", cause)
            } else {
                format!(
                    "  correction refused after {}: {}",
                    cause,
                    reasoning.as_deref().unwrap_or("no reasoning given")
                )
            }
        }
        PipelineEvent::Execution {
            round,
            success,
            row_count,
            error,
            ..
        } => {
            if *success {
                format!("  execution #{} succeeded ({} rows)", round, row_count)
            } else {
                format!(
                    "  execution #{} failed: {}",
                    round,
                    error.as_deref().unwrap_or("unknown error")
                )
            }
        }
        PipelineEvent::GenerationFailed { reason, .. } => format!("  {}", reason),
        PipelineEvent::PipelineRetry { next_attempt, .. } => {
            format!("  retrying full pipeline (attempt {})", next_attempt)
        }
        PipelineEvent::MemorySaved => "  saved query to memory".to_string(),
        PipelineEvent::MemorySkipped { reason } => format!("  not saved to memory: {}", reason),
    }
}

/// 面向用户的结果视图（省略每轮计划等细节）
pub fn result_view(result: &PipelineResult) -> Value {
    let mut view = json!({
        "status": result.status,
        "sql": result.sql,
        "pipeline_attempts": result.pipeline_attempts,
        "execution_attempts": result.execution_attempts,
        "corrections": result.corrections,
    });
    if let Some(execution) = &result.execution {
        let rows: Vec<_> = execution.data.iter().take(MAX_PREVIEW_ROWS).collect();
        view["result"] = json!({
            "success": execution.success,
            "columns": execution.columns,
            "row_count": execution.row_count,
            "truncated": execution.truncated || execution.row_count > MAX_PREVIEW_ROWS,
            "data": rows,
            "error": execution.error,
        });
    }
    if !result.error_feedback.is_empty() {
        view["error_feedback"] = json!(result.error_feedback);
    }
    if result.is_success() {
        view["memory_saved"] = json!(result.memory_saved);
    }
    view
}

pub fn render_result(result: &PipelineResult) -> String {
    serde_json::to_string_pretty(&result_view(result)).unwrap_or_else(|_| format!("{:?}", result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorFeedback, Stage};

    #[test]
    fn test_event_lines() {
        assert_eq!(
            render_event(&PipelineEvent::Stage {
                stage: Stage::Planning,
                attempt: 2
            }),
            "  [2] planning..."
        );
        assert_eq!(
            render_event(&PipelineEvent::Execution {
                attempt: 1,
                round: 2,
                success: false,
                row_count: 0,
                error: Some("no such table: Foo".into()),
            }),
            "  execution #2 failed: no such table: Foo"
        );
    }

    #[test]
    fn test_failed_result_view_has_feedback_and_no_memory_flag() {
        let mut feedback = ErrorFeedback::new();
        feedback.record(1, "SQL generation failed");
        let result = PipelineResult::from_attempts("q", Vec::new(), &feedback, None);
        let view = result_view(&result);
        assert_eq!(view["status"], json!("failed"));
        assert_eq!(view["sql"], Value::Null);
        assert_eq!(view["error_feedback"], json!("Attempt 1: SQL generation failed"));
        assert!(view.get("memory_saved").is_none());
        assert!(view.get("result").is_none());
    }
}
