//! 中间件：管线框架与执行一轮迭代的各个步骤
//!
//! 标准顺序：error_boundary → agent_loader → provider_selection → pending_calls →
//! context_setup → safety → llm_call → tool_execution

pub mod agent_loader;
pub mod context_setup;
pub mod error_boundary;
pub mod llm_call;
pub mod pending_calls;
pub mod pipeline;
pub mod provider_selection;
pub mod safety;
pub mod tool_execution;

pub use agent_loader::AgentLoader;
pub use context_setup::{build_system_prompt, ContextSetup};
pub use error_boundary::ErrorBoundary;
pub use llm_call::LlmCall;
pub use pending_calls::PendingCalls;
pub use pipeline::{Diagnostics, Middleware, MiddlewareContext, Next, Pipeline};
pub use provider_selection::ProviderSelection;
pub use safety::{depth_limit_message, estimate_tokens, SafetyGovernor};
pub use tool_execution::ToolExecution;
