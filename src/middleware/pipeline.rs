//! 中间件管线
//!
//! 每个步骤拿到 `(ctx, next)`：调用 `next.run(ctx)` 继续后续步骤，直接返回即短路。
//! 步骤严格按注册顺序执行；管线本身不做重试和分支，错误原样返回给执行器。

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::AgentDefinition;
use crate::core::{AgentError, ExecutionContext};
use crate::llm::{Message, ModelProvider, Sampling, StopReason, ToolCall, UsageMetrics};
use crate::tools::ToolSet;

/// 最近一次模型调用与本次运行的采样设置
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub model: Option<String>,
    pub sampling: Sampling,
    pub last_usage: Option<UsageMetrics>,
    pub last_stop_reason: Option<StopReason>,
    pub last_latency_ms: Option<u64>,
    pub token_estimate: usize,
}

/// 一次 run 的可变状态，由该 run 独占
pub struct MiddlewareContext {
    /// 调用方请求的 Agent 名（回退到 default 时仍保留原名）
    pub agent_name: String,
    pub prompt: String,
    pub exec: ExecutionContext,
    pub agent: Option<AgentDefinition>,
    pub tools: ToolSet,
    pub provider: Option<Arc<dyn ModelProvider>>,
    pub messages: Vec<Message>,
    /// 从 1 开始
    pub iteration: u32,
    pub should_continue: bool,
    pub result: Option<String>,
    /// 恢复会话时待补执行的调用
    pub pending_calls: Vec<ToolCall>,
    pub resumed: bool,
    pub diagnostics: Diagnostics,
}

impl MiddlewareContext {
    pub fn new(agent_name: impl Into<String>, prompt: impl Into<String>, exec: ExecutionContext) -> Self {
        Self {
            agent_name: agent_name.into(),
            prompt: prompt.into(),
            exec,
            agent: None,
            tools: ToolSet::default(),
            provider: None,
            messages: Vec::new(),
            iteration: 0,
            should_continue: true,
            result: None,
            pending_calls: Vec::new(),
            resumed: false,
            diagnostics: Diagnostics::default(),
        }
    }

    /// 以恢复出的历史开始
    pub fn resumed(mut self, messages: Vec<Message>, pending_calls: Vec<ToolCall>) -> Self {
        self.messages = messages;
        self.pending_calls = pending_calls;
        self.resumed = true;
        self
    }

    pub fn agent(&self) -> Result<&AgentDefinition, AgentError> {
        self.agent
            .as_ref()
            .ok_or_else(|| AgentError::Internal("agent definition not loaded".to_string()))
    }

    /// 正常结束本次运行
    pub fn finish(&mut self, result: impl Into<String>) {
        self.result = Some(result.into());
        self.should_continue = false;
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), AgentError>;
}

/// 剩余的步骤
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: &mut MiddlewareContext) -> Result<(), AgentError> {
        match self.rest.split_first() {
            Some((step, rest)) => step.handle(ctx, Next { rest }).await,
            None => Ok(()),
        }
    }
}

#[derive(Default, Clone)]
pub struct Pipeline {
    steps: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, step: impl Middleware + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn push(&mut self, step: Arc<dyn Middleware>) {
        self.steps.push(step);
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// 执行一次（一轮迭代）
    pub async fn run(&self, ctx: &mut MiddlewareContext) -> Result<(), AgentError> {
        Next { rest: &self.steps }.run(ctx).await
    }
}
