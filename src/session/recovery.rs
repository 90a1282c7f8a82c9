//! 由事件日志重建对话历史
//!
//! 重建规则：
//! - user → user 消息；assistant → assistant 消息（带 tool_calls 时恢复整轮调用）
//! - tool_call → 仅含该调用的 assistant 消息；若该 id 已由当前轮的 assistant 事件声明则跳过
//! - tool_result → tool 消息，按所属轮次的调用顺序排列；重复或无主的结果跳过
//! - 子 Agent（sidechain）事件与未知类型跳过
//!
//! 最后一轮 assistant 工具调用若有未回答的调用，会话视为「未完成」，恢复时先执行这些调用。

use std::collections::{HashMap, HashSet};

use crate::llm::{Message, Role, ToolCall};
use crate::session::todos::{recover_todos, TodoItem};
use crate::session::{EventPayload, SessionError, SessionEvent, SessionStorage};

/// 一轮工具调用：assistant 消息声明的调用 id（按顺序）与已收到的结果
///
/// 调用 id 只在一轮内唯一，去重也只在本轮内进行；下一轮可以复用同样的 id。
#[derive(Default)]
struct OpenTurn {
    call_order: Vec<String>,
    results: HashMap<String, Message>,
}

impl OpenTurn {
    fn declares(&self, id: &str) -> bool {
        self.call_order.iter().any(|c| c == id)
    }

    fn flush_into(self, messages: &mut Vec<Message>) {
        let mut results = self.results;
        for id in &self.call_order {
            if let Some(m) = results.remove(id) {
                messages.push(m);
            }
        }
    }
}

#[derive(Default)]
struct Rebuilder {
    messages: Vec<Message>,
    turn: Option<OpenTurn>,
}

impl Rebuilder {
    fn close_turn(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.flush_into(&mut self.messages);
        }
    }

    fn open_turn(&mut self, calls: &[ToolCall]) {
        self.turn = Some(OpenTurn {
            call_order: calls.iter().map(|c| c.id.clone()).collect(),
            results: HashMap::new(),
        });
    }

    fn apply(&mut self, event: &SessionEvent) {
        if event.is_sidechain() {
            return;
        }
        match &event.payload {
            EventPayload::User { content } => {
                self.close_turn();
                self.messages.push(Message::user(content.clone()));
            }
            EventPayload::Assistant {
                content,
                tool_calls,
            } => {
                self.close_turn();
                // 同一轮内同一 id 只保留第一次声明
                let mut seen = HashSet::new();
                let calls: Vec<ToolCall> = tool_calls
                    .iter()
                    .filter(|c| seen.insert(c.id.as_str()))
                    .cloned()
                    .collect();
                if !calls.is_empty() {
                    self.open_turn(&calls);
                }
                self.messages
                    .push(Message::assistant_with_tools(content.clone(), calls));
            }
            EventPayload::ToolCall { id, tool, params } => {
                // 调度器为本轮已声明的调用补记的 tool_call
                if self.turn.as_ref().is_some_and(|t| t.declares(id)) {
                    return;
                }
                self.close_turn();
                let call = ToolCall::new(id.clone(), tool.clone(), params.clone());
                self.open_turn(std::slice::from_ref(&call));
                self.messages
                    .push(Message::assistant_with_tools(None, vec![call]));
            }
            EventPayload::ToolResult {
                tool_call_id,
                result,
                ..
            } => {
                let Some(turn) = self.turn.as_mut().filter(|t| t.declares(tool_call_id)) else {
                    tracing::debug!(tool_call_id = %tool_call_id, "skipping orphan tool result");
                    return;
                };
                if turn.results.contains_key(tool_call_id) {
                    tracing::debug!(tool_call_id = %tool_call_id, "skipping duplicate tool result");
                    return;
                }
                turn.results.insert(
                    tool_call_id.clone(),
                    Message::tool(tool_call_id.clone(), result.clone()),
                );
            }
            _ => {}
        }
    }

    fn finish(mut self) -> Vec<Message> {
        self.close_turn();
        self.messages
    }
}

/// 把事件流折叠为消息历史（不含 system prompt）
pub fn reconstruct_messages(events: &[SessionEvent]) -> Vec<Message> {
    let mut rebuilder = Rebuilder::default();
    for event in events {
        rebuilder.apply(event);
    }
    rebuilder.finish()
}

/// 最后一条 assistant 消息中尚未得到结果的调用（按调用顺序）
///
/// 该 assistant 消息之后若已出现非 tool 消息，视为该轮已被放弃，返回空。
pub fn pending_tool_calls(messages: &[Message]) -> Vec<ToolCall> {
    let Some(idx) = messages.iter().rposition(|m| m.role == Role::Assistant) else {
        return Vec::new();
    };
    let tail = &messages[idx + 1..];
    if tail.iter().any(|m| m.role != Role::Tool) {
        return Vec::new();
    }
    let answered: HashSet<&str> = tail
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    messages[idx]
        .tool_calls
        .iter()
        .filter(|c| !answered.contains(c.id.as_str()))
        .cloned()
        .collect()
}

pub fn has_incomplete_tool_call(messages: &[Message]) -> bool {
    !pending_tool_calls(messages).is_empty()
}

/// 历史一致性检查结果
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HistoryReport {
    /// 没有对应调用（或重复回答）的 tool 消息
    pub orphan_results: Vec<String>,
    /// 之后出现了新消息但仍未回答的调用
    pub unanswered_calls: Vec<String>,
    /// 末尾等待结果的调用
    pub pending_calls: Vec<String>,
}

impl HistoryReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_results.is_empty() && self.unanswered_calls.is_empty()
    }
}

/// 检查「每条 tool 消息恰好回答一条此前未回答的调用」
pub fn validate_history(messages: &[Message]) -> HistoryReport {
    let mut report = HistoryReport::default();
    let mut open: Vec<String> = Vec::new();

    for m in messages {
        match m.role {
            Role::Tool => {
                let id = m.tool_call_id.clone().unwrap_or_default();
                match open.iter().position(|o| *o == id) {
                    Some(pos) => {
                        open.remove(pos);
                    }
                    None => report.orphan_results.push(id),
                }
            }
            _ => {
                report.unanswered_calls.append(&mut open);
                if m.role == Role::Assistant {
                    open = m.tool_calls.iter().map(|c| c.id.clone()).collect();
                }
            }
        }
    }
    report.pending_calls = open;
    report
}

/// 同一轮中重复的调用 id 只保留第一个
pub fn dedupe_tool_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|c| {
            let fresh = seen.insert(c.id.clone());
            if !fresh {
                tracing::warn!(tool_call_id = %c.id, tool = %c.name, "dropping duplicate tool call id");
            }
            fresh
        })
        .collect()
}

/// 恢复出的会话状态
#[derive(Debug, Clone)]
pub struct RecoveredSession {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub pending: Vec<ToolCall>,
    pub todos: Vec<TodoItem>,
    pub event_count: usize,
}

impl RecoveredSession {
    pub fn from_events(session_id: impl Into<String>, events: &[SessionEvent]) -> Self {
        let messages = reconstruct_messages(events);
        let pending = pending_tool_calls(&messages);
        Self {
            session_id: session_id.into(),
            pending,
            todos: recover_todos(events),
            event_count: events.len(),
            messages,
        }
    }

    pub fn is_incomplete(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// 读取并重建会话；会话不存在时返回 None
pub async fn recover_session(
    storage: &dyn SessionStorage,
    session_id: &str,
) -> Result<Option<RecoveredSession>, SessionError> {
    if !storage.exists(session_id).await? {
        return Ok(None);
    }
    let events = storage.read_all(session_id).await?;
    let recovered = RecoveredSession::from_events(session_id, &events);
    tracing::info!(
        session = %session_id,
        events = recovered.event_count,
        messages = recovered.messages.len(),
        pending = recovered.pending.len(),
        "session recovered"
    );
    Ok(Some(recovered))
}
