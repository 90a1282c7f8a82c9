//! 对话消息与模型调用的数据类型
//!
//! Message / ToolCall 与 OpenAI 兼容 API 的结构一致；UsageMetrics 记录一次或累计的 token 与费用。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型发起的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 单条消息
///
/// tool_calls 只出现在 assistant 消息上，tool_call_id 只出现在 tool 消息上。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Token / 费用统计；既用于单次调用，也用于委派树上的累计值
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub cache_hit_tokens: u64,
    #[serde(default)]
    pub cache_miss_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
    /// 参与累计的模型调用次数
    #[serde(default)]
    pub model_calls: u64,
}

impl UsageMetrics {
    /// 单次调用的统计（model_calls = 1）
    pub fn single_call(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            model_calls: 1,
            ..Self::default()
        }
    }

    /// 合并另一份统计（加法）
    pub fn merge(&mut self, other: &UsageMetrics) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cache_hit_tokens += other.cache_hit_tokens;
        self.cache_miss_tokens += other.cache_miss_tokens;
        self.cost_usd += other.cost_usd;
        self.model_calls += other.model_calls;
    }

    /// 相对某个快照的增量；用于子调用返回后只把子树新增部分并回父级
    pub fn delta_since(&self, snapshot: &UsageMetrics) -> UsageMetrics {
        UsageMetrics {
            prompt_tokens: self.prompt_tokens.saturating_sub(snapshot.prompt_tokens),
            completion_tokens: self
                .completion_tokens
                .saturating_sub(snapshot.completion_tokens),
            total_tokens: self.total_tokens.saturating_sub(snapshot.total_tokens),
            cache_hit_tokens: self.cache_hit_tokens.saturating_sub(snapshot.cache_hit_tokens),
            cache_miss_tokens: self
                .cache_miss_tokens
                .saturating_sub(snapshot.cache_miss_tokens),
            cost_usd: (self.cost_usd - snapshot.cost_usd).max(0.0),
            model_calls: self.model_calls.saturating_sub(snapshot.model_calls),
        }
    }
}

/// 模型停止原因
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

impl StopReason {
    /// 解析 OpenAI 风格的 finish_reason
    pub fn from_finish_reason(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" => StopReason::EndTurn,
            "tool_calls" | "tool_use" | "function_call" => StopReason::ToolUse,
            "length" | "max_tokens" => StopReason::MaxTokens,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// 暴露给模型的工具声明
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 结构化输出格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    Json,
    JsonSchema,
}

/// 结构化输出配置（来自 Agent 定义）
#[derive(Clone, Debug, PartialEq)]
pub struct StructuredOutput {
    pub format: ResponseFormat,
    pub schema: Option<Value>,
}

/// 采样参数
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sampling {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// 一次 complete 调用的输入
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
    pub structured_output: Option<&'a StructuredOutput>,
    pub sampling: Sampling,
}

/// 一次 complete 调用的输出
#[derive(Clone, Debug)]
pub struct Completion {
    pub message: Message,
    pub usage: Option<UsageMetrics>,
    pub stop_reason: Option<StopReason>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(content),
            usage: None,
            stop_reason: Some(StopReason::EndTurn),
        }
    }

    pub fn tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            message: Message::assistant_with_tools(content, calls),
            usage: None,
            stop_reason: Some(StopReason::ToolUse),
        }
    }

    pub fn with_usage(mut self, usage: UsageMetrics) -> Self {
        self.usage = Some(usage);
        self
    }
}
