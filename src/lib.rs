//! Hive - 多 Agent 执行内核
//!
//! 模块划分：
//! - **agents**: Agent 定义、来源（Markdown / 内联）与解析（含默认回退）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 执行上下文、错误、Agent 执行器、优雅关闭
//! - **llm**: 模型抽象与实现（OpenAI 兼容 / Mock）
//! - **middleware**: 每轮迭代的中间件管线（加载、选模型、安全检查、调模型、执行工具）
//! - **session**: 追加式事件日志、存储后端、广播与崩溃恢复
//! - **tools**: 工具注册表、内置工具与并发调度（含委派）

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod middleware;
pub mod observability;
pub mod session;
pub mod tools;

pub use crate::core::{AgentError, AgentExecutor, ExecutionContext, ExecutorParts, RunOutcome};
