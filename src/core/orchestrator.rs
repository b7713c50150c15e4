//! 编排状态机
//!
//! RETRIEVING_MEMORY → LINKING_SCHEMA → {PLANNING → GENERATING → VERIFYING/CORRECTING → EXECUTING} × N → SUCCEEDED | FAILED
//!
//! - 记忆检索与 Schema Linking 每个问题只执行一次，结果在各轮之间复用
//! - 完整流水线最多 max_full_pipeline_retries 轮，每轮带着累积反馈重新规划
//! - 每轮内：校验/纠错最多 max_verification_corrections 次，执行最多 max_execution_retries 次
//! - 纠错拒绝立即结束所在的子循环，不再消耗剩余次数
//! - 成功后按写入策略决定是否把 (question, sql) 存入查询记忆

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agents::{
    AgentRuntime, Corrector, Decoded, GenerationError, Planner, PromptSet, QueryPlan, SchemaContext,
    SchemaLinker, SqlGenerator, VerificationResult, Verifier,
};
use crate::config::{MemoryWritePolicy, PipelineSection};
use crate::core::error::PipelineError;
use crate::core::events::{send_event, CorrectionTrigger, PipelineEvent, Stage};
use crate::core::state::{Attempt, ErrorFeedback, PipelineResult};
use crate::database::{DatabaseSchema, ExecutionResult, SqlExecutor};
use crate::memory::{MemoryHit, NoopQueryMemory, QueryMemory};

/// 展示层协作者：成功后询问是否把结果写入查询记忆
#[async_trait]
pub trait SaveConfirmation: Send + Sync {
    async fn confirm_save(&self, question: &str, sql: &str, execution: &ExecutionResult) -> bool;
}

/// 固定回答的确认（非交互运行与测试）
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirmation(pub bool);

#[async_trait]
impl SaveConfirmation for FixedConfirmation {
    async fn confirm_save(&self, _question: &str, _sql: &str, _execution: &ExecutionResult) -> bool {
        self.0
    }
}

/// 三层重试上限（均至少为 1）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    pub max_full_pipeline_retries: usize,
    pub max_verification_corrections: usize,
    pub max_execution_retries: usize,
}

impl PipelineLimits {
    pub fn new(full_pipeline: usize, verification_corrections: usize, execution: usize) -> Self {
        Self {
            max_full_pipeline_retries: full_pipeline.max(1),
            max_verification_corrections: verification_corrections.max(1),
            max_execution_retries: execution.max(1),
        }
    }

    pub fn from_config(cfg: &PipelineSection) -> Self {
        Self::new(
            cfg.max_full_pipeline_retries,
            cfg.max_verification_corrections,
            cfg.max_execution_retries,
        )
    }
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self::from_config(&PipelineSection::default())
    }
}

/// 五个智能体
pub struct AgentSet {
    pub linker: SchemaLinker,
    pub planner: Planner,
    pub generator: SqlGenerator,
    pub verifier: Verifier,
    pub corrector: Corrector,
}

impl AgentSet {
    /// 所有智能体共用一个 LLM 运行时
    pub fn new(runtime: AgentRuntime, prompts: &PromptSet) -> Self {
        Self {
            linker: SchemaLinker::new(runtime.clone(), prompts.schema_linking.clone()),
            planner: Planner::new(runtime.clone(), prompts.planning.clone()),
            generator: SqlGenerator::new(runtime.clone(), prompts.sql_generation.clone()),
            verifier: Verifier::new(runtime.clone(), prompts.verification.clone()),
            corrector: Corrector::new(runtime, prompts.correction.clone()),
        }
    }
}

/// 校验/纠错子循环的结果
struct VerificationOutcome {
    sql: String,
    verification: Option<VerificationResult>,
    corrections: usize,
    feedback: Option<String>,
}

/// 执行重试子循环的结果
struct ExecutionOutcome {
    sql: String,
    execution: Option<ExecutionResult>,
    attempts: usize,
    corrections: usize,
    feedback: Option<String>,
}

/// 一个问题的共享输入（在各轮之间不变）
struct QuestionContext<'a> {
    question: &'a str,
    schema_context: &'a SchemaContext,
    memory_example: Option<&'a MemoryHit>,
    cancel: &'a CancellationToken,
    events: Option<&'a UnboundedSender<PipelineEvent>>,
}

/// 在取消时提前返回
async fn guard<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        out = fut => Ok(out),
    }
}

/// 智能体回复无法解析、已使用兜底值时发出告警事件
fn report_fallback<T>(
    events: Option<&UnboundedSender<PipelineEvent>>,
    stage: Stage,
    decoded: &Decoded<T>,
) {
    if let Some(reason) = decoded.fallback_reason() {
        send_event(
            events,
            PipelineEvent::Warning {
                stage,
                reason: reason.to_string(),
            },
        );
    }
}

pub struct Pipeline {
    schema: Arc<DatabaseSchema>,
    agents: AgentSet,
    executor: Arc<dyn SqlExecutor>,
    memory: Arc<dyn QueryMemory>,
    confirmation: Arc<dyn SaveConfirmation>,
    write_policy: MemoryWritePolicy,
    limits: PipelineLimits,
}

impl Pipeline {
    /// 默认：无查询记忆、写入策略 confirm 且不确认、默认重试上限
    pub fn new(
        schema: Arc<DatabaseSchema>,
        agents: AgentSet,
        executor: Arc<dyn SqlExecutor>,
    ) -> Self {
        Self {
            schema,
            agents,
            executor,
            memory: Arc::new(NoopQueryMemory),
            confirmation: Arc::new(FixedConfirmation(false)),
            write_policy: MemoryWritePolicy::default(),
            limits: PipelineLimits::default(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn QueryMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_confirmation(mut self, confirmation: Arc<dyn SaveConfirmation>) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_write_policy(mut self, policy: MemoryWritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn with_limits(mut self, limits: PipelineLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub fn limits(&self) -> PipelineLimits {
        self.limits
    }

    /// 处理一个问题；预期内的失败以 status=failed 的结果返回
    pub async fn run(
        &self,
        question: &str,
        cancel: &CancellationToken,
        events: Option<&UnboundedSender<PipelineEvent>>,
    ) -> Result<PipelineResult, PipelineError> {
        let question = question.trim();
        tracing::info!(question = %question, "pipeline started");

        send_event(events, PipelineEvent::Stage { stage: Stage::RetrievingMemory, attempt: 0 });
        let memory_example = guard(cancel, self.memory.retrieve(question)).await?;
        match &memory_example {
            Some(hit) => send_event(
                events,
                PipelineEvent::MemoryHit {
                    question: hit.question.clone(),
                    similarity: hit.similarity,
                },
            ),
            None => send_event(events, PipelineEvent::MemoryMiss),
        }

        send_event(events, PipelineEvent::Stage { stage: Stage::LinkingSchema, attempt: 0 });
        let linked = guard(cancel, self.agents.linker.link(question, &self.schema)).await??;
        if let Some(reason) = linked.fallback_reason() {
            send_event(
                events,
                PipelineEvent::Warning {
                    stage: Stage::LinkingSchema,
                    reason: reason.to_string(),
                },
            );
        }
        let schema_context = linked.into_value();
        tracing::info!(tables = ?schema_context.tables, "schema linked");

        let ctx = QuestionContext {
            question,
            schema_context: &schema_context,
            memory_example: memory_example.as_ref(),
            cancel,
            events,
        };

        let mut feedback = ErrorFeedback::new();
        let mut attempts: Vec<Attempt> = Vec::new();
        for number in 1..=self.limits.max_full_pipeline_retries {
            if number > 1 {
                tracing::info!(attempt = number, "regenerating plan after failed attempt");
                send_event(
                    events,
                    PipelineEvent::PipelineRetry {
                        next_attempt: number,
                        feedback: feedback.render(),
                    },
                );
            }
            let attempt = self.run_attempt(number, &ctx, &feedback).await?;
            for entry in &attempt.feedback {
                feedback.record(number, entry);
            }
            let succeeded = attempt.succeeded();
            attempts.push(attempt);
            if succeeded {
                break;
            }
        }

        let mut result =
            PipelineResult::from_attempts(question, attempts, &feedback, memory_example.clone());
        if result.is_success() {
            if let (Some(sql), Some(execution)) = (result.sql.clone(), result.execution.clone()) {
                result.memory_saved = self.persist(&ctx, &sql, &execution).await?;
            }
            tracing::info!(
                pipeline_attempts = result.pipeline_attempts,
                execution_attempts = result.execution_attempts,
                corrections = result.corrections,
                "pipeline succeeded"
            );
        } else {
            tracing::warn!(
                pipeline_attempts = result.pipeline_attempts,
                feedback = %result.error_feedback,
                "pipeline failed"
            );
        }
        Ok(result)
    }

    /// 一轮完整流水线；返回本轮快照
    async fn run_attempt(
        &self,
        number: usize,
        ctx: &QuestionContext<'_>,
        prior: &ErrorFeedback,
    ) -> Result<Attempt, PipelineError> {
        let prior_text = prior.render();

        send_event(ctx.events, PipelineEvent::Stage { stage: Stage::Planning, attempt: number });
        let planned = guard(
            ctx.cancel,
            self.agents
                .planner
                .plan(ctx.question, ctx.schema_context, &prior_text),
        )
        .await??;
        if let Some(reason) = planned.fallback_reason() {
            send_event(
                ctx.events,
                PipelineEvent::Warning {
                    stage: Stage::Planning,
                    reason: reason.to_string(),
                },
            );
        }
        let plan_fallback = planned.is_fallback();
        let plan = planned.into_value();

        send_event(ctx.events, PipelineEvent::Stage { stage: Stage::Generating, attempt: number });
        let generated = guard(
            ctx.cancel,
            self.agents.generator.generate(
                ctx.question,
                ctx.schema_context,
                &plan,
                ctx.memory_example,
                &prior_text,
            ),
        )
        .await?;
        let sql = match generated {
            Ok(sql) => sql,
            Err(GenerationError::Llm(e)) => return Err(e.into()),
            Err(GenerationError::Extract { error, .. }) => {
                let reason = format!("SQL generation failed: {}", error);
                tracing::warn!(attempt = number, "{}", reason);
                send_event(
                    ctx.events,
                    PipelineEvent::GenerationFailed {
                        attempt: number,
                        reason: reason.clone(),
                    },
                );
                return Ok(Attempt {
                    number,
                    plan,
                    plan_fallback,
                    sql: None,
                    verification: None,
                    verification_corrections: 0,
                    execution_corrections: 0,
                    execution_attempts: 0,
                    execution: None,
                    feedback: vec![reason],
                });
            }
        };
        tracing::debug!(attempt = number, sql = %sql, "sql generated");

        let verified = self.verify_and_correct(number, ctx, &plan, sql).await?;
        let executed = self
            .execute_with_retries(number, ctx, &plan, verified.sql.clone(), verified.verification.as_ref())
            .await?;

        let feedback = [verified.feedback, executed.feedback]
            .into_iter()
            .flatten()
            .collect();
        Ok(Attempt {
            number,
            plan,
            plan_fallback,
            sql: Some(executed.sql),
            verification: verified.verification,
            verification_corrections: verified.corrections,
            execution_corrections: executed.corrections,
            execution_attempts: executed.attempts,
            execution: executed.execution,
            feedback,
        })
    }

    /// 校验 → 纠错，最多 max_verification_corrections 次；拒绝时立即结束
    async fn verify_and_correct(
        &self,
        number: usize,
        ctx: &QuestionContext<'_>,
        plan: &QueryPlan,
        sql: String,
    ) -> Result<VerificationOutcome, PipelineError> {
        let mut outcome = VerificationOutcome {
            sql,
            verification: None,
            corrections: 0,
            feedback: None,
        };

        for round in 1..=self.limits.max_verification_corrections {
            send_event(ctx.events, PipelineEvent::Stage { stage: Stage::Verifying, attempt: number });
            let decoded = guard(
                ctx.cancel,
                self.agents
                    .verifier
                    .verify(ctx.schema_context, plan, &outcome.sql),
            )
            .await??;
            if let Some(reason) = decoded.fallback_reason() {
                send_event(
                    ctx.events,
                    PipelineEvent::Warning {
                        stage: Stage::Verifying,
                        reason: reason.to_string(),
                    },
                );
            }
            let verification = decoded.into_value();
            send_event(
                ctx.events,
                PipelineEvent::Verification {
                    attempt: number,
                    round,
                    is_valid: verification.is_valid,
                    issues: verification.issues.clone(),
                },
            );
            if verification.is_valid {
                outcome.verification = Some(verification);
                break;
            }

            send_event(ctx.events, PipelineEvent::Stage { stage: Stage::Correcting, attempt: number });
            let correction = guard(
                ctx.cancel,
                self.agents.corrector.correct(
                    ctx.schema_context,
                    plan,
                    &outcome.sql,
                    Some(&verification),
                    None,
                ),
            )
            .await??;
            report_fallback(ctx.events, Stage::Correcting, &correction);
            let correction = correction.into_value();
            let accepted = correction.accepted_sql().map(str::to_string);
            send_event(
                ctx.events,
                PipelineEvent::Correction {
                    attempt: number,
                    trigger: CorrectionTrigger::Verification,
                    accepted: accepted.is_some(),
                    reasoning: correction.reasoning.clone(),
                },
            );
            match accepted {
                Some(fixed) => {
                    tracing::info!(attempt = number, round, "verification correction applied");
                    outcome.corrections += 1;
                    outcome.sql = fixed;
                    outcome.verification = Some(verification);
                }
                None => {
                    tracing::info!(attempt = number, round, "correction refused after verification");
                    outcome.feedback = Some(format!(
                        "verification issues: {}; correction refused: {}",
                        verification.issues_text(),
                        correction.reasoning_text()
                    ));
                    outcome.verification = Some(verification);
                    break;
                }
            }
        }
        Ok(outcome)
    }

    /// 执行，失败则带执行错误纠错后重试，最多 max_execution_retries 次执行
    async fn execute_with_retries(
        &self,
        number: usize,
        ctx: &QuestionContext<'_>,
        plan: &QueryPlan,
        sql: String,
        verification: Option<&VerificationResult>,
    ) -> Result<ExecutionOutcome, PipelineError> {
        let max = self.limits.max_execution_retries;
        let open_issues = verification.filter(|v| !v.is_valid);
        let mut outcome = ExecutionOutcome {
            sql,
            execution: None,
            attempts: 0,
            corrections: 0,
            feedback: None,
        };

        for round in 1..=max {
            send_event(ctx.events, PipelineEvent::Stage { stage: Stage::Executing, attempt: number });
            let execution = guard(ctx.cancel, self.executor.execute(&outcome.sql)).await?;
            outcome.attempts = round;
            send_event(
                ctx.events,
                PipelineEvent::Execution {
                    attempt: number,
                    round,
                    success: execution.success,
                    row_count: execution.row_count,
                    error: execution.error.clone(),
                },
            );
            if execution.success {
                outcome.execution = Some(execution);
                return Ok(outcome);
            }

            let error = execution.error_text().to_string();
            outcome.execution = Some(execution);
            if round == max {
                outcome.feedback = Some(format!(
                    "execution failed after {} attempts: {}",
                    max, error
                ));
                break;
            }

            send_event(ctx.events, PipelineEvent::Stage { stage: Stage::Correcting, attempt: number });
            let correction = guard(
                ctx.cancel,
                self.agents.corrector.correct(
                    ctx.schema_context,
                    plan,
                    &outcome.sql,
                    open_issues,
                    Some(&error),
                ),
            )
            .await??;
            report_fallback(ctx.events, Stage::Correcting, &correction);
            let correction = correction.into_value();
            let accepted = correction.accepted_sql().map(str::to_string);
            send_event(
                ctx.events,
                PipelineEvent::Correction {
                    attempt: number,
                    trigger: CorrectionTrigger::Execution,
                    accepted: accepted.is_some(),
                    reasoning: correction.reasoning.clone(),
                },
            );
            match accepted {
                Some(fixed) => {
                    tracing::info!(attempt = number, round, "execution correction applied");
                    outcome.corrections += 1;
                    outcome.sql = fixed;
                }
                None => {
                    tracing::info!(attempt = number, round, "correction refused after execution error");
                    outcome.feedback = Some(format!(
                        "execution error: {}; correction refused: {}",
                        error,
                        correction.reasoning_text()
                    ));
                    break;
                }
            }
        }
        Ok(outcome)
    }

    /// 按写入策略决定是否存入查询记忆
    async fn persist(
        &self,
        ctx: &QuestionContext<'_>,
        sql: &str,
        execution: &ExecutionResult,
    ) -> Result<bool, PipelineError> {
        let skip = |reason: &str| {
            tracing::info!("memory write skipped: {}", reason);
            send_event(
                ctx.events,
                PipelineEvent::MemorySkipped {
                    reason: reason.to_string(),
                },
            );
        };

        if !self.memory.enabled() {
            skip("query memory disabled");
            return Ok(false);
        }
        let approved = match self.write_policy {
            MemoryWritePolicy::Never => {
                skip("write policy is never");
                return Ok(false);
            }
            MemoryWritePolicy::Always => true,
            MemoryWritePolicy::Confirm => {
                guard(
                    ctx.cancel,
                    self.confirmation.confirm_save(ctx.question, sql, execution),
                )
                .await?
            }
        };
        if !approved {
            skip("not confirmed");
            return Ok(false);
        }

        let saved = guard(ctx.cancel, self.memory.add(ctx.question, sql)).await?;
        if saved {
            send_event(ctx.events, PipelineEvent::MemorySaved);
        } else {
            skip("memory write failed");
        }
        Ok(saved)
    }
}
