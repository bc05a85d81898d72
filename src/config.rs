//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DEEP_RESEARCH__*` 覆盖
//! （双下划线表示嵌套，如 `DEEP_RESEARCH__AGENT__TOKEN_CEILING=80000`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::RetryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub storage: StorageSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// Durable 层的线程标识
    pub thread_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            thread_id: "default".to_string(),
        }
    }
}

/// [agent] 段：每批预算、压缩与委派
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations_per_batch: usize,
    pub time_limit_seconds_per_batch: u64,
    pub token_ceiling: usize,
    /// 超过 token_ceiling 的这一比例即触发压缩
    pub compaction_high_water_mark: f64,
    /// 压缩时原样保留的最近消息条数
    pub recency_window_turns: usize,
    pub delegation_enabled: bool,
    pub first_nudge_fraction: f64,
    pub final_warning_fraction: f64,
    pub chars_per_token: f64,
    pub subagent_max_iterations: usize,
    pub subagent_time_limit_seconds: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations_per_batch: 40,
            time_limit_seconds_per_batch: 900,
            token_ceiling: 60_000,
            compaction_high_water_mark: 0.8,
            recency_window_turns: 6,
            delegation_enabled: true,
            first_nudge_fraction: 0.6,
            final_warning_fraction: 0.85,
            chars_per_token: 3.2,
            subagent_max_iterations: 20,
            subagent_time_limit_seconds: 300,
        }
    }
}

fn is_fraction(v: f64) -> bool {
    v > 0.0 && v <= 1.0
}

impl AgentSection {
    pub fn validate(&self) -> Result<(), AgentError> {
        let fail = |msg: &str| Err(AgentError::ConfigError(msg.to_string()));
        if self.max_iterations_per_batch == 0 {
            return fail("agent.max_iterations_per_batch must be greater than 0");
        }
        if self.time_limit_seconds_per_batch == 0 {
            return fail("agent.time_limit_seconds_per_batch must be greater than 0");
        }
        if self.token_ceiling == 0 {
            return fail("agent.token_ceiling must be greater than 0");
        }
        if !is_fraction(self.compaction_high_water_mark) {
            return fail("agent.compaction_high_water_mark must be in (0, 1]");
        }
        if !is_fraction(self.first_nudge_fraction) || !is_fraction(self.final_warning_fraction) {
            return fail("agent timer fractions must be in (0, 1]");
        }
        if self.first_nudge_fraction >= self.final_warning_fraction {
            return fail("agent.first_nudge_fraction must be less than agent.final_warning_fraction");
        }
        if self.chars_per_token <= 0.0 {
            return fail("agent.chars_per_token must be positive");
        }
        if self.subagent_max_iterations == 0 || self.subagent_time_limit_seconds == 0 {
            return fail("agent subagent limits must be greater than 0");
        }
        Ok(())
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_seconds_per_batch)
    }

    pub fn subagent_time_limit(&self) -> Duration {
        Duration::from_secs(self.subagent_time_limit_seconds)
    }
}

/// [llm] 段：后端选择与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；实际选择还取决于是否设置了 API Key
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub retry: RetryConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            retry: RetryConfig::default(),
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）；delegate 不受此限制
    pub tool_timeout_secs: u64,
    pub crawl: CrawlSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            crawl: CrawlSection::default(),
        }
    }
}

/// [tools.crawl] 段：抓取 URL 的超时、最大字符数、允许的域名白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlSection {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 15,
            max_result_chars: 8000,
            allowed_domains: vec![
                "wikipedia.org".into(),
                "arxiv.org".into(),
                "github.com".into(),
                "docs.rs".into(),
                "doc.rust-lang.org".into(),
                "developer.mozilla.org".into(),
                "news.ycombinator.com".into(),
            ],
        }
    }
}

/// [storage] 段：设置 durable_dir 时 Durable 层落盘为 JSON 文件，否则仅在内存中
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub durable_dir: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 DEEP_RESEARCH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在且可解析，可覆盖前面的键）
/// 3. 最后叠加环境变量 DEEP_RESEARCH__*（双下划线表示嵌套键）
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
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DEEP_RESEARCH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
