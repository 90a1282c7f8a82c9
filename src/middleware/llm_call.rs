//! 调用模型，记录 assistant 事件，累计用量

use std::time::Instant;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::{CompletionRequest, Role};
use crate::middleware::{Middleware, MiddlewareContext, Next};
use crate::session::{dedupe_tool_calls, EventLogger, EventMetadata, EventPayload, SessionEvent};

pub struct LlmCall {
    logger: EventLogger,
}

impl LlmCall {
    pub fn new(logger: EventLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Middleware for LlmCall {
    fn name(&self) -> &'static str {
        "llm_call"
    }

    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), AgentError> {
        let provider = ctx
            .provider
            .clone()
            .ok_or_else(|| AgentError::Internal("no model provider selected".to_string()))?;
        let specs = ctx.tools.specs();
        let structured = ctx.agent()?.structured_output();

        let start = Instant::now();
        let completion = provider
            .complete(CompletionRequest {
                messages: &ctx.messages,
                tools: &specs,
                structured_output: structured.as_ref(),
                sampling: ctx.diagnostics.sampling,
            })
            .await?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let usage = completion.usage.or_else(|| provider.last_usage_metrics());
        let stop_reason = completion
            .stop_reason
            .or_else(|| provider.last_stop_reason());
        if let Some(u) = &usage {
            ctx.exec.usage.merge(u);
        }

        let mut message = completion.message;
        message.role = Role::Assistant;
        message.tool_call_id = None;
        message.tool_calls = dedupe_tool_calls(std::mem::take(&mut message.tool_calls));

        tracing::debug!(
            agent = %ctx.agent_name,
            depth = ctx.exec.depth,
            iteration = ctx.iteration,
            tool_calls = message.tool_calls.len(),
            latency_ms,
            "model responded"
        );

        let event = SessionEvent::new(EventPayload::Assistant {
            content: message.content.clone(),
            tool_calls: message.tool_calls.clone(),
        })
        .with_metadata(EventMetadata {
            model: Some(provider.model_name().to_string()),
            usage,
            latency_ms: Some(latency_ms),
            ..ctx.exec.event_metadata(&ctx.agent_name)
        });
        self.logger.log(&ctx.exec.session_id, event).await;

        ctx.diagnostics.last_usage = usage;
        ctx.diagnostics.last_stop_reason = stop_reason;
        ctx.diagnostics.last_latency_ms = Some(latency_ms);
        ctx.messages.push(message);

        next.run(ctx).await
    }
}
