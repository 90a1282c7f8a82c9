//! todo_write 工具：提交完整的待办列表
//!
//! 工具本身无状态：校验通过即成功，当前列表由事件日志中的最近一次成功调用决定。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::Value;

use crate::session::todos::{parse_todo_args, TodoInput, TodoStatus, TODO_TOOL_NAME};
use crate::tools::{parameters_schema_for, Tool};

#[allow(dead_code)]
#[derive(JsonSchema)]
struct TodoWriteArgs {
    /// 完整的待办列表（替换之前的列表）
    todos: Vec<TodoInput>,
}

pub struct TodoWriteTool;

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        TODO_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Replace the current task list. Send the full list every time. \
         At most one item may be in_progress; content must be unique."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<TodoWriteArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let todos = parse_todo_args(&args)?;
        let count = |status: TodoStatus| todos.iter().filter(|t| t.status == status).count();
        Ok(format!(
            "Todo list updated: {} total ({} pending, {} in progress, {} completed)",
            todos.len(),
            count(TodoStatus::Pending),
            count(TodoStatus::InProgress),
            count(TodoStatus::Completed),
        ))
    }
}
