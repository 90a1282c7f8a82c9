//! delegate 工具：把子任务交给另一个 Agent
//!
//! 这里只提供声明（名称、描述、参数 schema）；实际的递归调用由 ToolDispatcher 拦截完成，
//! 直接 execute 总是返回错误。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{parameters_schema_for, Tool};

pub const DELEGATE_TOOL_NAME: &str = "delegate";

/// delegate 参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DelegateArgs {
    /// 目标 Agent 名称；没有合适的专用 Agent 时用 "default"
    pub agent: String,
    /// 交给该 Agent 的任务，需清楚具体
    pub prompt: String,
    /// 3-5 个词的任务简述（用于日志与追踪）
    #[serde(default)]
    pub description: Option<String>,
}

impl DelegateArgs {
    pub fn parse(args: &Value) -> Result<Self, String> {
        let parsed: DelegateArgs = serde_json::from_value(args.clone())
            .map_err(|e| format!("Invalid delegate args: {e}"))?;
        if parsed.agent.trim().is_empty() {
            return Err("Invalid delegate args: agent must not be empty".to_string());
        }
        if parsed.prompt.trim().is_empty() {
            return Err("Invalid delegate args: prompt must not be empty".to_string());
        }
        Ok(parsed)
    }
}

pub struct DelegateTool {
    description: String,
}

impl DelegateTool {
    /// `agents` 为可委派的 Agent 名称，写进描述供模型选择
    pub fn new(agents: &[String]) -> Self {
        let agent_list = if agents.is_empty() {
            "No specialized agents are defined. Use \"default\" for general-purpose tasks."
                .to_string()
        } else {
            format!("Available agents: {}", agents.join(", "))
        };
        Self {
            description: format!(
                "Delegate work to a specialized agent for autonomous completion. \
                 The agent starts with a fresh conversation, works on the prompt you give it, \
                 and its final text answer is returned as this tool's result.\n\n{agent_list}"
            ),
        }
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        DELEGATE_TOOL_NAME
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<DelegateArgs>()
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        Err("delegate is handled by the agent executor and cannot run directly".to_string())
    }
}
