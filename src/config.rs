//! 应用配置：从 config/default.toml、.env 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TEXT2SQL__*` 覆盖（双下划线表示嵌套，如 `TEXT2SQL__LLM__PROVIDER=openai`）。
//! API Key 等敏感项不放 TOML，由 `.env` / 环境变量提供（OPENAI_API_KEY、DEEPSEEK_API_KEY、TOGETHER_API_KEY）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub database: DatabaseSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub memory: MemorySection,
    pub pipeline: PipelineSection,
}

/// [app] 段：应用名、Prompt 目录、日志目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 各智能体 system prompt 的覆盖目录，缺失的文件使用内置默认
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
    /// 每次运行写一个 run_YYYYMMDD_HHMMSS.log；为空则只输出到 stderr
    #[serde(default = "default_log_dir")]
    pub log_dir: Option<PathBuf>,
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("config/prompts")
}

fn default_log_dir() -> Option<PathBuf> {
    Some(PathBuf::from("logs"))
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            prompts_dir: default_prompts_dir(),
            log_dir: default_log_dir(),
        }
    }
}

/// [database] 段：目标 SQLite 库
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    /// 只读打开（INSERT/UPDATE/DELETE 会被引擎拒绝，错误回流到纠错）
    #[serde(default = "default_true")]
    pub read_only: bool,
    /// 单条 SQL 执行超时（秒），超时后中断查询
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// 单次执行最多取回的行数
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/chinook.db")
}

fn default_true() -> bool {
    true
}

fn default_query_timeout_secs() -> u64 {
    30
}

fn default_max_rows() -> usize {
    10_000
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            read_only: true,
            query_timeout_secs: default_query_timeout_secs(),
            max_rows: default_max_rows(),
        }
    }
}

/// [llm] 段：后端选择、温度与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：ollama / openai / deepseek / together
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 通用模型名；各 provider 子段的 model 优先
    pub model: Option<String>,
    /// OpenAI 兼容端点（仅 provider=openai 时使用）
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub openai: ProviderModelSection,
    #[serde(default)]
    pub deepseek: ProviderModelSection,
    #[serde(default)]
    pub together: ProviderModelSection,
    #[serde(default)]
    pub ollama: OllamaSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "ollama".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            temperature: 0.0,
            openai: ProviderModelSection::default(),
            deepseek: ProviderModelSection::default(),
            together: ProviderModelSection::default(),
            ollama: OllamaSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProviderModelSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OllamaSection {
    pub endpoint: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次 LLM 请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

/// [embedding] 段：查询记忆用的嵌入后端
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// ollama / openai
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    /// Ollama 端点或 OpenAI 兼容 base_url
    pub endpoint: Option<String>,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: default_provider(),
            model: None,
            endpoint: None,
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

/// 成功执行后是否把 (question, sql) 写回查询记忆
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryWritePolicy {
    /// 询问用户，确认后才写入
    #[default]
    Confirm,
    /// 成功即写入
    Always,
    /// 从不写入
    Never,
}

/// [memory] 段：查询记忆存储
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// 余弦相似度阈值，达到才视为命中
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default)]
    pub write_policy: MemoryWritePolicy,
    /// text2sql-seed 默认读取的种子文件
    #[serde(default = "default_seed_path")]
    pub seed_path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("query_memory/memory.db")
}

fn default_similarity_threshold() -> f32 {
    0.8
}

fn default_seed_path() -> PathBuf {
    PathBuf::from("data/seed_questions.json")
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: default_store_path(),
            similarity_threshold: default_similarity_threshold(),
            write_policy: MemoryWritePolicy::default(),
            seed_path: default_seed_path(),
        }
    }
}

/// [pipeline] 段：三层重试上限
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// 完整流水线（重新规划 + 生成）最多次数
    #[serde(default = "default_max_full_pipeline_retries")]
    pub max_full_pipeline_retries: usize,
    /// 每轮内 校验→纠错 最多次数
    #[serde(default = "default_max_verification_corrections")]
    pub max_verification_corrections: usize,
    /// 每轮内 执行 最多次数（之间最多 max-1 次纠错）
    #[serde(default = "default_max_execution_retries")]
    pub max_execution_retries: usize,
}

fn default_max_full_pipeline_retries() -> usize {
    2
}

fn default_max_verification_corrections() -> usize {
    2
}

fn default_max_execution_retries() -> usize {
    3
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_full_pipeline_retries: default_max_full_pipeline_retries(),
            max_verification_corrections: default_max_verification_corrections(),
            max_execution_retries: default_max_execution_retries(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TEXT2SQL__* 可覆盖
///
/// 1. 若存在 .env，先载入进程环境（不覆盖已有变量）
/// 2. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 3. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 4. 最后叠加环境变量 TEXT2SQL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let _ = dotenv::dotenv();

    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignored", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TEXT2SQL")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_contract() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.pipeline.max_full_pipeline_retries, 2);
        assert_eq!(cfg.pipeline.max_verification_corrections, 2);
        assert_eq!(cfg.pipeline.max_execution_retries, 3);
        assert!((cfg.memory.similarity_threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(cfg.memory.write_policy, MemoryWritePolicy::Confirm);
        assert_eq!(cfg.llm.provider, "ollama");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[llm]\nprovider = \"openai\"\n\n[memory]\nwrite_policy = \"always\"\n\n[pipeline]\nmax_execution_retries = 5\n",
        )
        .unwrap();

        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.timeouts.request, 120);
        assert_eq!(cfg.memory.write_policy, MemoryWritePolicy::Always);
        assert_eq!(cfg.pipeline.max_execution_retries, 5);
        assert_eq!(cfg.pipeline.max_full_pipeline_retries, 2);
        assert_eq!(cfg.database.path, PathBuf::from("data/chinook.db"));
    }
}
