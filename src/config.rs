//! 应用配置：从 config/default.toml、指定文件与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如
//! `HIVE__SAFETY__MAX_ITERATIONS=30`）。所有字段都有默认值，没有配置文件也能运行。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::tools::DispatchConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub safety: SafetyConfig,
    pub models: ModelsSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub session: SessionSection,
    pub agents: AgentsSection,
}

/// [safety] 段：委派深度、迭代次数与 token 估算上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub max_iterations: u32,
    /// 达到该迭代次数起每轮输出警告
    pub warn_at_iteration: u32,
    /// 模型未报告上下文窗口时使用的 token 估算上限
    pub max_tokens_estimate: usize,
    pub max_depth: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            warn_at_iteration: 10,
            max_tokens_estimate: 50_000,
            max_depth: 5,
        }
    }
}

/// [models] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    pub default_model: String,
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".to_string(),
        }
    }
}

/// [llm] 段：OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: Option<String>,
    /// 保存 API Key 的环境变量名
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub max_concurrent_tools: usize,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            max_concurrent_tools: 5,
            tool_timeout_secs: 30,
        }
    }
}

impl ToolsSection {
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_concurrent_tools: self.max_concurrent_tools.max(1),
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
        }
    }
}

/// 会话存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Noop,
    Memory,
    Filesystem,
}

/// [session] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub storage: StorageKind,
    pub dir: PathBuf,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            storage: StorageKind::Filesystem,
            dir: PathBuf::from(".agent-sessions"),
        }
    }
}

/// [agents] 段：Markdown 定义目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentsSection {
    pub directory: PathBuf,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("agents"),
        }
    }
}

/// 加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在）
/// 3. 最后叠加环境变量 HIVE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
