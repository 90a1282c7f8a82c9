//! 模型提供方抽象
//!
//! 执行内核只通过 ModelProvider 与模型交互：给定消息与工具声明返回一次 Completion；
//! 用量与停止原因同时放在 Completion 中，并保留 last_usage_metrics / last_stop_reason 侧通道。
//! ProviderFactory 按模型名构造提供方，供 Agent 定义里的 model 覆盖使用。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{Completion, CompletionRequest, StopReason, UsageMetrics};

/// 模型调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Missing credentials for model '{model}': set {env_var}")]
    MissingCredentials { model: String, env_var: String },

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("OpenAI client error: {0}")]
    OpenAi(#[from] async_openai::error::OpenAIError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// 模型提供方：一次非流式完成
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// 实际使用的模型名
    fn model_name(&self) -> &str;

    /// 模型上下文窗口（token）；未知时返回 None，由配置的估算上限兜底
    fn context_window(&self) -> Option<usize> {
        None
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError>;

    /// 最近一次调用的用量（侧通道）
    fn last_usage_metrics(&self) -> Option<UsageMetrics> {
        None
    }

    /// 最近一次调用的停止原因（侧通道）
    fn last_stop_reason(&self) -> Option<StopReason> {
        None
    }
}

/// 按模型名构造提供方
pub trait ProviderFactory: Send + Sync {
    /// 未指定模型时使用的默认模型
    fn default_model(&self) -> &str;

    fn create(&self, model: &str) -> Result<Arc<dyn ModelProvider>, LlmError>;
}
