//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SPAR__*` 覆盖（双下划线表示嵌套，如 `SPAR__LLM__PROVIDER=deepseek_sdk`）。
//! 认证信息另外兼容平台脚本惯用的 `AUTHORIZATION` / `COOKIE` / `CUSTOM_HEADERS` / `TASK_ID`。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub platform: PlatformSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub retry: RetrySection,
    pub replay: ReplaySection,
    pub generator: GeneratorSection,
    pub workflow: WorkflowSection,
}

impl AppConfig {
    /// 日志目录：显式配置优先；否则放在知识库文档同级的 log 目录；都没有时为 ./log
    pub fn log_dir(&self) -> PathBuf {
        if let Some(dir) = &self.app.log_dir {
            return dir.clone();
        }
        self.generator
            .knowledge_base
            .as_deref()
            .and_then(Path::parent)
            .map(|parent| parent.join("log"))
            .unwrap_or_else(|| PathBuf::from("log"))
    }
}

/// 回答来源模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// 人工逐轮输入
    Interactive,
    /// 使用预设答案列表
    Preset,
    /// 大模型扮演学生自动回答
    #[default]
    Generated,
    /// 优先回放历史对话，未命中再交给大模型
    Replayed,
}

/// [app] 段：日志目录、并发会话上限、运行模式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 未配置时见 [`AppConfig::log_dir`]
    pub log_dir: Option<PathBuf>,
    pub max_concurrent_sessions: usize,
    pub mode: RunMode,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            log_dir: None,
            max_concurrent_sessions: 5,
            mode: RunMode::default(),
        }
    }
}

/// [platform] 段：训练平台地址与认证头
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformSection {
    pub base_url: String,
    pub authorization: Option<String>,
    pub cookie: Option<String>,
    pub custom_headers: HashMap<String, String>,
    pub user_agent: String,
    /// 从步骤列表的第几项开始训练（列表前几项可能是开场/说明节点）
    pub start_step_index: usize,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            base_url: "https://cloudapi.polymas.com".to_string(),
            authorization: None,
            cookie: None,
            custom_headers: HashMap::new(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            start_step_index: 0,
        }
    }
}

/// [llm] 段：后端选择（doubao_sdk / doubao_post / deepseek_sdk / openai / mock）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub post: LlmPostSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "doubao_sdk".to_string(),
            model: None,
            base_url: None,
            api_key: None,
            temperature: 0.85,
            post: LlmPostSection::default(),
        }
    }
}

/// [llm.post] 段：内部 LLM 网关（HTTP POST + service-code）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmPostSection {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub service_code: String,
    pub max_tokens: u32,
}

impl Default for LlmPostSection {
    fn default() -> Self {
        Self {
            api_url: "http://llm-service.polymas.com/api/openai/v1/chat/completions".to_string(),
            api_key: None,
            model: "Doubao-1.5-pro-32k".to_string(),
            service_code: "SI_Ability".to_string(),
            max_tokens: 1000,
        }
    }
}

/// [embedding] 段：语义回放使用的嵌入模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

/// [retry] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub timeout_schedule_secs: Vec<u64>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            timeout_schedule_secs: vec![60, 120, 180],
        }
    }
}

/// 回放引擎实现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplayVariant {
    #[default]
    Lexical,
    Semantic,
}

/// [replay] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplaySection {
    /// 历史对话日志（.txt 可读格式或 .jsonl 结构化格式）
    pub source: Option<PathBuf>,
    pub variant: ReplayVariant,
    pub lexical_threshold: f32,
    pub semantic_threshold: f32,
    /// step_first：同步骤优先，未命中再全量；step_only：只在同步骤内查找
    pub scope: crate::replay::ReplayScope,
    /// 向量缓存目录，未设置时与日志文件同目录
    pub cache_dir: Option<PathBuf>,
}

impl Default for ReplaySection {
    fn default() -> Self {
        Self {
            source: None,
            variant: ReplayVariant::default(),
            lexical_threshold: 0.7,
            semantic_threshold: 0.8,
            scope: crate::replay::ReplayScope::default(),
            cache_dir: None,
        }
    }
}

/// [generator] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    /// 学生回答最大字符数
    pub max_answer_chars: usize,
    /// 提示词中保留的最近对话轮数
    pub history_turns: usize,
    pub knowledge_base: Option<PathBuf>,
    pub sample_dialogue: Option<PathBuf>,
    /// 知识库 / 示例对话各自截断到的字符数
    pub max_reference_chars: usize,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            max_answer_chars: 50,
            history_turns: 10,
            knowledge_base: None,
            sample_dialogue: None,
            max_reference_chars: 20_000,
        }
    }
}

/// [workflow] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub task_id: Option<String>,
    /// 角色 key 或菜单编号，如 ["S1", "3"]
    pub personas: Vec<String>,
    /// 单个会话的对话轮数上限，防止死循环
    pub max_turns: u32,
    /// 两轮之间的等待（毫秒），避免请求过快
    pub turn_delay_ms: u64,
    pub preset_answers: Vec<String>,
    /// 自定义角色文件（TOML），未设置时使用内置 S1-S5
    pub persona_file: Option<PathBuf>,
    /// 自动生成失败时改由操作员在终端输入
    pub manual_fallback: bool,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            task_id: None,
            personas: Vec::new(),
            max_turns: 50,
            turn_delay_ms: 1000,
            preset_answers: Vec::new(),
            persona_file: None,
            manual_fallback: false,
        }
    }
}

/// 从 config 目录加载配置，环境变量 SPAR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 SPAR__*（双下划线表示嵌套键）
/// 4. 仍为空的认证字段回落到 AUTHORIZATION / COOKIE / CUSTOM_HEADERS / TASK_ID
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
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
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SPAR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let mut cfg: AppConfig = c.try_deserialize()?;
    apply_env_fallbacks(&mut cfg);
    Ok(cfg)
}

fn apply_env_fallbacks(cfg: &mut AppConfig) {
    if cfg.platform.authorization.is_none() {
        cfg.platform.authorization = std::env::var("AUTHORIZATION").ok();
    }
    if cfg.platform.cookie.is_none() {
        cfg.platform.cookie = std::env::var("COOKIE").ok();
    }
    if let Ok(raw) = std::env::var("CUSTOM_HEADERS") {
        match serde_json::from_str::<HashMap<String, String>>(&raw) {
            Ok(extra) => {
                for (k, v) in extra {
                    cfg.platform.custom_headers.entry(k).or_insert(v);
                }
            }
            Err(e) => tracing::warn!("CUSTOM_HEADERS 格式不正确，已忽略: {}", e),
        }
    }
    if cfg.workflow.task_id.is_none() {
        cfg.workflow.task_id = std::env::var("TASK_ID").ok();
    }
}
