//! 流水线过程事件：供 REPL 展示进度，也可序列化为 JSON

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 状态机阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RetrievingMemory,
    LinkingSchema,
    Planning,
    Generating,
    Verifying,
    Correcting,
    Executing,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::RetrievingMemory => "retrieving memory",
            Stage::LinkingSchema => "linking schema",
            Stage::Planning => "planning",
            Stage::Generating => "generating SQL",
            Stage::Verifying => "verifying SQL",
            Stage::Correcting => "correcting SQL",
            Stage::Executing => "executing SQL",
        }
    }
}

/// 纠错由什么触发
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionTrigger {
    Verification,
    Execution,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// 进入某阶段（attempt 为完整流水线轮次，前两阶段为 0）
    Stage { stage: Stage, attempt: usize },
    MemoryHit { question: String, similarity: f32 },
    MemoryMiss,
    /// 智能体回复无法解析，已使用兜底值
    Warning { stage: Stage, reason: String },
    Verification {
        attempt: usize,
        round: usize,
        is_valid: bool,
        issues: Vec<String>,
    },
    Correction {
        attempt: usize,
        trigger: CorrectionTrigger,
        accepted: bool,
        reasoning: Option<String>,
    },
    Execution {
        attempt: usize,
        round: usize,
        success: bool,
        row_count: usize,
        error: Option<String>,
    },
    GenerationFailed { attempt: usize, reason: String },
    /// 本轮失败，重新规划
    PipelineRetry { next_attempt: usize, feedback: String },
    MemorySaved,
    MemorySkipped { reason: String },
}

pub(crate) fn send_event(tx: Option<&UnboundedSender<PipelineEvent>>, ev: PipelineEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
