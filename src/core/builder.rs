//! 流水线构建器：从 AppConfig 组装 Schema、智能体、执行器与查询记忆
//!
//! REPL 与种子工具共用同一套构建逻辑。查询记忆打开失败时降级为 Noop 并告警，不阻止启动。

use std::sync::Arc;
use std::time::Duration;

use crate::agents::{AgentRuntime, PromptSet};
use crate::config::AppConfig;
use crate::core::error::PipelineError;
use crate::core::orchestrator::{AgentSet, FixedConfirmation, Pipeline, PipelineLimits, SaveConfirmation};
use crate::database::{DatabaseSchema, SqliteExecutor};
use crate::llm::{create_embedder_from_config, create_llm_from_config, LlmClient};
use crate::memory::{NoopQueryMemory, QueryMemory, SqliteQueryMemory};

pub struct PipelineBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    prompts: Option<PromptSet>,
    confirmation: Arc<dyn SaveConfirmation>,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            prompts: None,
            confirmation: Arc::new(FixedConfirmation(false)),
        }
    }

    /// 使用指定 LLM，而不是按配置创建
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn with_confirmation(mut self, confirmation: Arc<dyn SaveConfirmation>) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        self.llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config.llm))
    }

    /// 查询记忆；未启用、嵌入不可配置或存储打不开时返回 Noop
    pub fn build_memory(&self) -> Arc<dyn QueryMemory> {
        let cfg = &self.config.memory;
        if !cfg.enabled {
            tracing::info!("query memory disabled by config");
            return Arc::new(NoopQueryMemory);
        }
        let Some(embedder) = create_embedder_from_config(&self.config.embedding) else {
            tracing::warn!("no embedding provider available, query memory disabled");
            return Arc::new(NoopQueryMemory);
        };
        match SqliteQueryMemory::open(&cfg.store_path, embedder, cfg.similarity_threshold) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!("query memory disabled: {}", e);
                Arc::new(NoopQueryMemory)
            }
        }
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let p = &self.config.pipeline;
        for (name, value) in [
            ("max_full_pipeline_retries", p.max_full_pipeline_retries),
            ("max_verification_corrections", p.max_verification_corrections),
            ("max_execution_retries", p.max_execution_retries),
        ] {
            if value == 0 {
                return Err(PipelineError::Config(format!("pipeline.{} must be at least 1", name)));
            }
        }
        let threshold = self.config.memory.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PipelineError::Config(format!(
                "memory.similarity_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        Ok(())
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        self.validate()?;

        let schema = Arc::new(DatabaseSchema::load(&self.config.database.path)?);
        let prompts = self
            .prompts
            .clone()
            .unwrap_or_else(|| PromptSet::load(&self.config.app.prompts_dir));
        let runtime = AgentRuntime::new(
            self.build_llm(),
            self.config.llm.temperature,
            Duration::from_secs(self.config.llm.timeouts.request),
        );
        tracing::info!(llm = runtime.llm_name(), "agents ready");

        let executor = Arc::new(SqliteExecutor::from_config(&self.config.database));
        let memory = self.build_memory();

        Ok(Pipeline::new(schema, AgentSet::new(runtime, &prompts), executor)
            .with_memory(memory)
            .with_confirmation(self.confirmation)
            .with_write_policy(self.config.memory.write_policy)
            .with_limits(PipelineLimits::from_config(&self.config.pipeline)))
    }
}
