//! 核心编排层：状态机、构建器、错误、结果快照与过程事件

pub mod builder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod state;

pub use builder::PipelineBuilder;
pub use error::PipelineError;
pub use events::{CorrectionTrigger, PipelineEvent, Stage};
pub use orchestrator::{AgentSet, FixedConfirmation, Pipeline, PipelineLimits, SaveConfirmation};
pub use state::{Attempt, ErrorFeedback, PipelineResult, PipelineStatus};
