//! 恢复会话时补执行中断的工具调用，之后才允许再次调用模型

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::middleware::{Middleware, MiddlewareContext, Next};
use crate::tools::ToolDispatcher;

pub struct PendingCalls {
    dispatcher: Arc<ToolDispatcher>,
}

impl PendingCalls {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Middleware for PendingCalls {
    fn name(&self) -> &'static str {
        "pending_calls"
    }

    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), AgentError> {
        if !ctx.pending_calls.is_empty() {
            let calls = std::mem::take(&mut ctx.pending_calls);
            tracing::info!(
                agent = %ctx.agent_name,
                pending = calls.len(),
                "completing interrupted tool calls"
            );
            let results = self
                .dispatcher
                .dispatch(&calls, &ctx.tools, &ctx.agent_name, &mut ctx.exec)
                .await?;
            ctx.messages.extend(results);
        }
        next.run(ctx).await
    }
}
