//! 会话事件
//!
//! 事件日志是对话历史的唯一来源。每条事件序列化为一行 JSON：
//! `{"type": "...", "timestamp": <ms>, "data": {...}, "metadata": {...}}`。
//! 未知 type 在读取时保留为 `EventPayload::Unknown`，重建时跳过。

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{ToolCall, UsageMetrics};

/// 已知事件类型（data 格式错误的已知类型视为损坏行）
const KNOWN_TYPES: &[&str] = &[
    "user",
    "assistant",
    "tool_call",
    "tool_result",
    "agent_start",
    "agent_iteration",
    "agent_complete",
    "agent_error",
    "delegation",
    "delegation_complete",
];

/// 事件内容（type + data）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: Option<String>,
        /// 同一轮中模型发起的全部调用；重建时据此恢复多调用的 assistant 消息
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolCall {
        id: String,
        tool: String,
        #[serde(default)]
        params: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool: String,
        result: String,
        #[serde(default)]
        is_error: bool,
    },
    AgentStart {
        agent: String,
        prompt: String,
    },
    AgentIteration {
        agent: String,
        iteration: u32,
    },
    AgentComplete {
        agent: String,
        result: String,
        iterations: u32,
    },
    AgentError {
        agent: String,
        error: String,
    },
    Delegation {
        from: String,
        to: String,
        call_id: String,
        prompt: String,
    },
    DelegationComplete {
        from: String,
        to: String,
        call_id: String,
        #[serde(default)]
        is_error: bool,
    },
    /// 本版本不认识的事件类型
    #[serde(skip)]
    Unknown { kind: String, data: Value },
}

/// 广播分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Conversation,
    Tool,
    Lifecycle,
    Delegation,
    Other,
}

impl EventCategory {
    pub const ALL: [EventCategory; 5] = [
        EventCategory::Conversation,
        EventCategory::Tool,
        EventCategory::Lifecycle,
        EventCategory::Delegation,
        EventCategory::Other,
    ];
}

impl EventPayload {
    /// 事件 type 字段
    pub fn kind(&self) -> &str {
        match self {
            EventPayload::User { .. } => "user",
            EventPayload::Assistant { .. } => "assistant",
            EventPayload::ToolCall { .. } => "tool_call",
            EventPayload::ToolResult { .. } => "tool_result",
            EventPayload::AgentStart { .. } => "agent_start",
            EventPayload::AgentIteration { .. } => "agent_iteration",
            EventPayload::AgentComplete { .. } => "agent_complete",
            EventPayload::AgentError { .. } => "agent_error",
            EventPayload::Delegation { .. } => "delegation",
            EventPayload::DelegationComplete { .. } => "delegation_complete",
            EventPayload::Unknown { kind, .. } => kind,
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            EventPayload::User { .. } | EventPayload::Assistant { .. } => {
                EventCategory::Conversation
            }
            EventPayload::ToolCall { .. } | EventPayload::ToolResult { .. } => EventCategory::Tool,
            EventPayload::AgentStart { .. }
            | EventPayload::AgentIteration { .. }
            | EventPayload::AgentComplete { .. }
            | EventPayload::AgentError { .. } => EventCategory::Lifecycle,
            EventPayload::Delegation { .. } | EventPayload::DelegationComplete { .. } => {
                EventCategory::Delegation
            }
            EventPayload::Unknown { .. } => EventCategory::Other,
        }
    }
}

/// 事件元数据：模型、用量、耗时与委派树位置
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_call_id: Option<String>,
    /// 委派子 Agent 产生的事件
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sidechain: bool,
}

/// 一条会话事件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent", into = "RawEvent")]
pub struct SessionEvent {
    pub payload: EventPayload,
    /// 毫秒时间戳，进程内严格递增
    pub timestamp: i64,
    pub metadata: Option<EventMetadata>,
}

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// 单调递增的毫秒时间戳：同一毫秒内的事件依次 +1
fn next_timestamp() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let prev = LAST_TIMESTAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(prev + 1)
}

impl SessionEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: next_timestamp(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    pub fn is_sidechain(&self) -> bool {
        self.metadata.as_ref().map(|m| m.sidechain).unwrap_or(false)
    }

    /// 序列化为单行 JSON（不含换行）
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 线上格式
#[derive(Serialize, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    timestamp: i64,
    #[serde(default)]
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<EventMetadata>,
}

impl From<SessionEvent> for RawEvent {
    fn from(event: SessionEvent) -> Self {
        let (kind, data) = match event.payload {
            EventPayload::Unknown { kind, data } => (kind, data),
            payload => {
                let kind = payload.kind().to_string();
                let data = serde_json::to_value(&payload)
                    .ok()
                    .and_then(|mut v| v.get_mut("data").map(Value::take))
                    .unwrap_or(Value::Null);
                (kind, data)
            }
        };
        RawEvent {
            kind,
            timestamp: event.timestamp,
            data,
            metadata: event.metadata,
        }
    }
}

impl TryFrom<RawEvent> for SessionEvent {
    type Error = String;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let payload = if KNOWN_TYPES.contains(&raw.kind.as_str()) {
            let tagged = serde_json::json!({ "type": raw.kind, "data": raw.data });
            serde_json::from_value::<EventPayload>(tagged)
                .map_err(|e| format!("malformed '{}' event: {e}", raw.kind))?
        } else {
            EventPayload::Unknown {
                kind: raw.kind,
                data: raw.data,
            }
        };
        Ok(SessionEvent {
            payload,
            timestamp: raw.timestamp,
            metadata: raw.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let event = SessionEvent::new(EventPayload::ToolResult {
            tool_call_id: "c1".into(),
            tool: "echo".into(),
            result: "hi".into(),
            is_error: false,
        })
        .with_metadata(EventMetadata {
            agent: Some("worker".into()),
            depth: Some(1),
            sidechain: true,
            ..Default::default()
        });

        let v: Value = serde_json::from_str(&event.to_json_line().unwrap()).unwrap();
        assert_eq!(v["type"], "tool_result");
        assert_eq!(v["data"]["tool_call_id"], "c1");
        assert_eq!(v["metadata"]["sidechain"], true);
        assert!(v["metadata"].get("model").is_none());

        let back: SessionEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, event);
        assert!(back.is_sidechain());
    }

    #[test]
    fn test_unknown_type_preserved() {
        let line = json!({"type": "compaction", "timestamp": 5, "data": {"x": 1}});
        let event: SessionEvent = serde_json::from_value(line).unwrap();
        assert_eq!(event.kind(), "compaction");
        assert_eq!(event.payload.category(), EventCategory::Other);

        let again = serde_json::to_value(&event).unwrap();
        assert_eq!(again["data"]["x"], 1);
    }

    #[test]
    fn test_malformed_known_type_rejected() {
        let line = json!({"type": "user", "timestamp": 5, "data": {"nope": true}});
        assert!(serde_json::from_value::<SessionEvent>(line).is_err());
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let a = SessionEvent::new(EventPayload::User { content: "a".into() });
        let b = SessionEvent::new(EventPayload::User { content: "b".into() });
        let c = SessionEvent::new(EventPayload::User { content: "c".into() });
        assert!(a.timestamp < b.timestamp);
        assert!(b.timestamp < c.timestamp);
    }
}
