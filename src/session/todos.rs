//! 待办列表
//!
//! 待办不单独持久化：todo_write 每次提交完整列表，恢复时从事件日志倒序找到
//! 最近一次成功的 todo_write 调用即可得到当前状态。

use std::collections::{HashMap, HashSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{EventPayload, SessionEvent};

pub const TODO_TOOL_NAME: &str = "todo_write";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TodoPriority {
    High,
    #[default]
    Medium,
    Low,
}

/// 模型提交的待办项（id / priority 可省略）
#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TodoInput {
    /// 省略时自动生成
    #[serde(default)]
    pub id: Option<String>,
    /// 任务描述（祈使句）
    pub content: String,
    /// 进行中时展示的描述（进行时）
    #[serde(alias = "active_form")]
    pub active_form: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: Option<TodoPriority>,
}

/// 校验后的待办项
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub active_form: String,
    pub status: TodoStatus,
    pub priority: TodoPriority,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TodoError {
    #[error("Todo #{0} has empty content")]
    EmptyContent(usize),

    #[error("Todo #{0} has empty activeForm")]
    EmptyActiveForm(usize),

    #[error("Duplicate todo content: {0:?}")]
    DuplicateContent(String),

    #[error("Only one todo can be in_progress at a time (found {0})")]
    MultipleInProgress(usize),
}

/// 校验并规范化一次提交的完整列表
pub fn validate_todos(inputs: Vec<TodoInput>) -> Result<Vec<TodoItem>, TodoError> {
    let in_progress = inputs
        .iter()
        .filter(|t| t.status == TodoStatus::InProgress)
        .count();
    if in_progress > 1 {
        return Err(TodoError::MultipleInProgress(in_progress));
    }

    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.into_iter().enumerate() {
        let content = input.content.trim().to_string();
        if content.is_empty() {
            return Err(TodoError::EmptyContent(i + 1));
        }
        if input.active_form.trim().is_empty() {
            return Err(TodoError::EmptyActiveForm(i + 1));
        }
        if !seen.insert(content.clone()) {
            return Err(TodoError::DuplicateContent(content));
        }
        items.push(TodoItem {
            id: input
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("todo-{}", i + 1)),
            content,
            active_form: input.active_form.trim().to_string(),
            status: input.status,
            priority: input.priority.unwrap_or_default(),
        });
    }
    Ok(items)
}

/// 从 todo_write 的参数解析出列表
pub fn parse_todo_args(args: &serde_json::Value) -> Result<Vec<TodoItem>, String> {
    #[derive(Deserialize)]
    struct Args {
        todos: Vec<TodoInput>,
    }
    let args: Args =
        serde_json::from_value(args.clone()).map_err(|e| format!("Invalid todo_write args: {e}"))?;
    validate_todos(args.todos).map_err(|e| e.to_string())
}

/// 当前待办：最近一次成功的主线 todo_write 调用；没有则为空
pub fn recover_todos(events: &[SessionEvent]) -> Vec<TodoItem> {
    let outcomes: HashMap<&str, bool> = events
        .iter()
        .filter(|e| !e.is_sidechain())
        .filter_map(|e| match &e.payload {
            EventPayload::ToolResult {
                tool_call_id,
                is_error,
                ..
            } => Some((tool_call_id.as_str(), *is_error)),
            _ => None,
        })
        .collect();

    events
        .iter()
        .rev()
        .filter(|e| !e.is_sidechain())
        .filter_map(|e| match &e.payload {
            EventPayload::ToolCall { id, tool, params } if tool == TODO_TOOL_NAME => {
                Some((id.as_str(), params))
            }
            _ => None,
        })
        .filter(|(id, _)| outcomes.get(id) == Some(&false))
        .find_map(|(_, params)| parse_todo_args(params).ok())
        .unwrap_or_default()
}
