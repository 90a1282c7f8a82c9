//! 模型层：消息类型、提供方抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;
pub mod types;

pub use mock::{MockProvider, StaticProviderFactory};
pub use openai::{OpenAiCompatibleFactory, OpenAiCompatibleProvider};
pub use traits::{LlmError, ModelProvider, ProviderFactory};
pub use types::{
    Completion, CompletionRequest, Message, ResponseFormat, Role, Sampling, StopReason,
    StructuredOutput, ToolCall, ToolSpec, UsageMetrics,
};
