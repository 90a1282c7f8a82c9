//! 工具注册表
//!
//! 所有工具实现 Tool trait，由 ToolRegistry 按名注册；每个 Agent 运行时通过
//! filter_for_agent 得到自己可用的 ToolSet（有序、只读）。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::ToolPermission;
use crate::llm::ToolSpec;

/// 工具 trait：名称、描述（供模型理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型 tool_call 中的 name）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 可与其它安全工具并发执行（只读、无共享副作用）
    fn is_concurrency_safe(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具目录：按名称存储，名称顺序稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool registered twice, keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 按 Agent 的工具声明收窄：通配 → 全部（按名称排序）；列表 → 按列表顺序，未知名称忽略
    pub fn filter_for_agent(&self, permission: &ToolPermission) -> ToolSet {
        let tools = match permission {
            ToolPermission::All => self.tools.values().cloned().collect(),
            ToolPermission::Named(names) => {
                let mut seen = HashSet::new();
                names
                    .iter()
                    .filter(|n| seen.insert(n.as_str()))
                    .filter_map(|n| {
                        let tool = self.tools.get(n).cloned();
                        if tool.is_none() {
                            tracing::debug!(tool = %n, "agent lists unknown tool, ignoring");
                        }
                        tool
                    })
                    .collect()
            }
        };
        ToolSet { tools }
    }
}

/// 一次运行可用的工具（有序）
#[derive(Default, Clone)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 暴露给模型的工具声明
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// (name, description)，用于 system prompt 的可用工具段落
    pub fn descriptions(&self) -> Vec<(&str, &str)> {
        self.tools
            .iter()
            .map(|t| (t.name(), t.description()))
            .collect()
    }
}
