//! Agent 定义
//!
//! 一个 Agent = 提示词 + 可用工具 + 可选的模型 / 采样 / 深度 / 结构化输出覆盖。
//! 定义加载后只读。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::llm::{ResponseFormat, Sampling, StructuredOutput};

pub const DEFAULT_AGENT_NAME: &str = "default";

const DEFAULT_AGENT_PROMPT: &str = "You are a versatile, general-purpose assistant capable of handling any task.

## Your Approach
1. Understand what needs to be accomplished
2. Use tools to gather the information you need
3. Execute the solution methodically
4. Return results as text in your response

## Key Capabilities
- You have access to all available tools
- You can delegate to other agents when they exist
- You adapt your approach to the task at hand

Return your findings as text: think of yourself as a function whose return value goes back to the caller.";

/// 工具声明：`"all"` / `"*"` 表示全部，否则为有序名称列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPermission {
    All,
    Named(Vec<String>),
}

impl Default for ToolPermission {
    fn default() -> Self {
        ToolPermission::Named(Vec::new())
    }
}

impl Serialize for ToolPermission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ToolPermission::All => serializer.serialize_str("all"),
            ToolPermission::Named(names) => names.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ToolPermission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Word(String),
            List(Vec<String>),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Word(w) if w == "*" || w.eq_ignore_ascii_case("all") => Ok(ToolPermission::All),
            Raw::Word(w) => Ok(ToolPermission::Named(vec![w])),
            Raw::List(list) if list.iter().any(|n| n == "*") => Ok(ToolPermission::All),
            Raw::List(list) => Ok(ToolPermission::Named(list)),
        }
    }
}

/// 采样风格预设
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorPreset {
    Deterministic,
    Precise,
    Balanced,
    Creative,
    Exploratory,
}

impl BehaviorPreset {
    /// (temperature, top_p)
    pub fn sampling(self) -> (f32, f32) {
        match self {
            BehaviorPreset::Deterministic => (0.0, 0.1),
            BehaviorPreset::Precise => (0.2, 0.5),
            BehaviorPreset::Balanced => (0.5, 0.9),
            BehaviorPreset::Creative => (0.7, 0.95),
            BehaviorPreset::Exploratory => (0.9, 0.99),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub tools: ToolPermission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<BehaviorPreset>,
    /// 只能收紧全局深度上限
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            tools: ToolPermission::default(),
            model: None,
            temperature: None,
            top_p: None,
            behavior: None,
            max_depth: None,
            response_format: None,
            json_schema: None,
        }
    }

    /// 内置 default Agent：全部工具、系统默认模型、balanced
    pub fn builtin_default() -> Self {
        Self {
            tools: ToolPermission::All,
            behavior: Some(BehaviorPreset::Balanced),
            ..Self::new(DEFAULT_AGENT_NAME, DEFAULT_AGENT_PROMPT)
        }
    }

    /// 请求的 Agent 不存在时的替身：default，并在提示词中注明
    pub fn fallback_for(requested: &str) -> Self {
        let mut agent = Self::builtin_default();
        agent.prompt.push_str(&format!(
            "\n\n## Context\nYou were invoked as '{requested}' but that specific agent doesn't exist. \
             Use your general capabilities to handle this task effectively."
        ));
        agent
    }

    pub fn with_tools(mut self, tools: ToolPermission) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_behavior(mut self, behavior: BehaviorPreset) -> Self {
        self.behavior = Some(behavior);
        self
    }

    /// 采样参数：显式 temperature / top_p 优先，其次预设
    pub fn sampling(&self) -> Sampling {
        let preset = self.behavior.map(BehaviorPreset::sampling);
        Sampling {
            temperature: self.temperature.or(preset.map(|p| p.0)),
            top_p: self.top_p.or(preset.map(|p| p.1)),
        }
    }

    /// 结构化输出；text 或未设置时为 None
    pub fn structured_output(&self) -> Option<StructuredOutput> {
        match self.response_format? {
            ResponseFormat::Text => None,
            format => Some(StructuredOutput {
                format,
                schema: self.json_schema.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_permission_forms() {
        let all: ToolPermission = serde_json::from_value(json!("*")).unwrap();
        assert_eq!(all, ToolPermission::All);
        let all: ToolPermission = serde_json::from_value(json!("all")).unwrap();
        assert_eq!(all, ToolPermission::All);
        let list: ToolPermission = serde_json::from_value(json!(["read", "write"])).unwrap();
        assert_eq!(list, ToolPermission::Named(vec!["read".into(), "write".into()]));
    }

    #[test]
    fn test_sampling_priority() {
        let mut agent = AgentDefinition::new("a", "p").with_behavior(BehaviorPreset::Creative);
        assert_eq!(agent.sampling().temperature, Some(0.7));
        assert_eq!(agent.sampling().top_p, Some(0.95));

        agent.temperature = Some(0.3);
        assert_eq!(agent.sampling().temperature, Some(0.3));
        assert_eq!(agent.sampling().top_p, Some(0.95));

        let plain = AgentDefinition::new("b", "p");
        assert_eq!(plain.sampling(), Sampling::default());
    }

    #[test]
    fn test_presets_graduated() {
        let order = [
            BehaviorPreset::Deterministic,
            BehaviorPreset::Precise,
            BehaviorPreset::Balanced,
            BehaviorPreset::Creative,
            BehaviorPreset::Exploratory,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].sampling().0 < pair[1].sampling().0);
        }
    }

    #[test]
    fn test_fallback_annotation() {
        let agent = AgentDefinition::fallback_for("reviewer");
        assert_eq!(agent.name, DEFAULT_AGENT_NAME);
        assert_eq!(agent.tools, ToolPermission::All);
        assert!(agent.prompt.contains("You were invoked as 'reviewer'"));
    }

    #[test]
    fn test_structured_output() {
        let mut agent = AgentDefinition::new("a", "p");
        assert!(agent.structured_output().is_none());
        agent.response_format = Some(ResponseFormat::Text);
        assert!(agent.structured_output().is_none());
        agent.response_format = Some(ResponseFormat::JsonSchema);
        agent.json_schema = Some(json!({"type": "object"}));
        let out = agent.structured_output().unwrap();
        assert_eq!(out.format, ResponseFormat::JsonSchema);
        assert!(out.schema.is_some());
    }
}
