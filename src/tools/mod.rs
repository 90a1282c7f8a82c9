//! 工具：Tool trait、注册表、调度器与内置工具（delegate / todo_write / echo）

pub mod delegate;
pub mod dispatch;
pub mod echo;
pub mod registry;
pub mod schema;
pub mod todo_write;

pub use delegate::{DelegateArgs, DelegateTool, DELEGATE_TOOL_NAME};
pub use dispatch::{Delegator, DispatchConfig, ToolDispatcher};
pub use echo::EchoTool;
pub use registry::{Tool, ToolRegistry, ToolSet};
pub use schema::parameters_schema_for;
pub use todo_write::TodoWriteTool;

/// 内置工具目录；`agents` 为可委派的 Agent 名称
pub fn builtin_registry(agents: &[String]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(DelegateTool::new(agents));
    registry.register(TodoWriteTool);
    registry.register(EchoTool);
    registry
}
