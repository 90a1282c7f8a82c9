//! 执行内核错误类型
//!
//! 只有「必须让整棵委派树停下」的情况才是 AgentError；工具自身的失败会变成
//! is_error 的 tool 消息交还给模型，深度到顶则是带说明文本的正常结束。

use thiserror::Error;

use crate::llm::LlmError;
use crate::session::SessionError;

/// 触发的安全上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyLimitKind {
    Iterations,
    TokenEstimate,
}

impl std::fmt::Display for SafetyLimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafetyLimitKind::Iterations => write!(f, "iterations"),
            SafetyLimitKind::TokenEstimate => write!(f, "token estimate"),
        }
    }
}

/// Agent 执行中的致命错误；沿委派链原样向上传播
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Safety limit exceeded ({kind}): {message}")]
    SafetyLimit {
        kind: SafetyLimitKind,
        message: String,
    },

    #[error(
        "Agent '{agent}' requests model '{model}', which is unavailable: {reason}. \
         Configure credentials for this model or remove the model override from the agent definition."
    )]
    ModelUnavailable {
        agent: String,
        model: String,
        reason: String,
    },

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Executor is shutting down; run stopped")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn safety_limit_kind(&self) -> Option<SafetyLimitKind> {
        match self {
            AgentError::SafetyLimit { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
