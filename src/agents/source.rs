//! Agent 定义来源
//!
//! - MarkdownAgentSource：`<dir>/<name>.md`，`+++` 包围的 TOML front matter + 正文提示词，带缓存
//! - InlineAgentSource：程序内直接注册的定义

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::agents::{AgentDefinition, BehaviorPreset, ToolPermission, DEFAULT_AGENT_NAME};
use crate::llm::ResponseFormat;

#[derive(Error, Debug)]
pub enum AgentSourceError {
    #[error("Failed to read agent file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid agent definition {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Agent 定义来源：按名加载，列出可用名称
#[async_trait]
pub trait AgentSource: Send + Sync {
    /// 不存在时返回 Ok(None)
    async fn load_agent(&self, name: &str) -> Result<Option<AgentDefinition>, AgentSourceError>;

    async fn list_agents(&self) -> Vec<String>;
}

/// front matter 字段
#[derive(Debug, Deserialize)]
struct FrontMatter {
    name: String,
    #[serde(default)]
    tools: ToolPermission,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    behavior: Option<BehaviorPreset>,
    #[serde(default)]
    max_depth: Option<usize>,
    #[serde(default)]
    response_format: Option<ResponseFormat>,
    /// JSON 字符串形式的 schema
    #[serde(default)]
    json_schema: Option<String>,
}

/// 解析 `+++\n<toml>\n+++\n<prompt>` 格式
pub fn parse_agent_markdown(path: &Path, content: &str) -> Result<AgentDefinition, AgentSourceError> {
    let invalid = |reason: String| AgentSourceError::Invalid {
        path: path.to_path_buf(),
        reason,
    };

    let content = content.trim_start_matches('\u{feff}');
    let rest = content
        .strip_prefix("+++")
        .ok_or_else(|| invalid("missing '+++' front matter".to_string()))?;
    let end = rest
        .find("\n+++")
        .ok_or_else(|| invalid("unterminated front matter".to_string()))?;
    let front = &rest[..end];
    let body = rest[end + 4..].trim();

    let meta: FrontMatter = toml::from_str(front).map_err(|e| invalid(e.to_string()))?;
    if meta.name.trim().is_empty() {
        return Err(invalid("'name' must not be empty".to_string()));
    }
    let json_schema = match meta.json_schema {
        Some(raw) => Some(
            serde_json::from_str(&raw).map_err(|e| invalid(format!("json_schema: {e}")))?,
        ),
        None => None,
    };

    Ok(AgentDefinition {
        name: meta.name,
        prompt: body.to_string(),
        tools: meta.tools,
        model: meta.model,
        temperature: meta.temperature,
        top_p: meta.top_p,
        behavior: meta.behavior,
        max_depth: meta.max_depth,
        response_format: meta.response_format,
        json_schema,
    })
}

pub struct MarkdownAgentSource {
    dir: PathBuf,
    cache: RwLock<HashMap<String, AgentDefinition>>,
}

impl MarkdownAgentSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn agent_path(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        Some(self.dir.join(format!("{name}.md")))
    }
}

#[async_trait]
impl AgentSource for MarkdownAgentSource {
    async fn load_agent(&self, name: &str) -> Result<Option<AgentDefinition>, AgentSourceError> {
        if let Some(agent) = self.cache.read().await.get(name) {
            return Ok(Some(agent.clone()));
        }
        let Some(path) = self.agent_path(name) else {
            return Ok(None);
        };
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(AgentSourceError::Io { path, source }),
        };
        let agent = parse_agent_markdown(&path, &content)?;
        self.cache
            .write()
            .await
            .insert(name.to_string(), agent.clone());
        tracing::debug!(agent = %name, path = %path.display(), "agent definition loaded");
        Ok(Some(agent))
    }

    async fn list_agents(&self) -> Vec<String> {
        let mut names = vec![DEFAULT_AGENT_NAME.to_string()];
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = %self.dir.display(), error = %e, "failed to list agents");
                }
                return names;
            }
        };
        let mut found = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if stem != DEFAULT_AGENT_NAME {
                    found.push(stem.to_string());
                }
            }
        }
        found.sort();
        names.extend(found);
        names
    }
}

/// 程序内注册的定义
#[derive(Default)]
pub struct InlineAgentSource {
    agents: HashMap<String, AgentDefinition>,
}

impl InlineAgentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: AgentDefinition) -> Self {
        self.agents.insert(agent.name.clone(), agent);
        self
    }
}

#[async_trait]
impl AgentSource for InlineAgentSource {
    async fn load_agent(&self, name: &str) -> Result<Option<AgentDefinition>, AgentSourceError> {
        Ok(self.agents.get(name).cloned())
    }

    async fn list_agents(&self) -> Vec<String> {
        let mut found: Vec<String> = self
            .agents
            .keys()
            .filter(|n| n.as_str() != DEFAULT_AGENT_NAME)
            .cloned()
            .collect();
        found.sort();
        let mut names = vec![DEFAULT_AGENT_NAME.to_string()];
        names.extend(found);
        names
    }
}
