//! 会话：事件日志、存储后端、广播与恢复
//!
//! 事件日志是对话历史的唯一来源；历史、待办、未完成的工具调用都由事件折叠得到。

pub mod event;
pub mod hub;
pub mod logger;
pub mod recovery;
pub mod storage;
pub mod todos;

pub use event::{EventCategory, EventMetadata, EventPayload, SessionEvent};
pub use hub::{EventHub, HubEvent};
pub use logger::EventLogger;
pub use recovery::{
    dedupe_tool_calls, has_incomplete_tool_call, pending_tool_calls, reconstruct_messages,
    recover_session, validate_history, HistoryReport, RecoveredSession,
};
pub use storage::{FileStorage, MemoryStorage, NoopStorage, SessionError, SessionStorage};
pub use todos::{recover_todos, TodoItem, TodoPriority, TodoStatus};
