//! 执行模型回复中的工具调用；没有调用时本次运行结束，结果为回复文本

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::middleware::{Middleware, MiddlewareContext, Next};
use crate::tools::ToolDispatcher;

pub struct ToolExecution {
    dispatcher: Arc<ToolDispatcher>,
}

impl ToolExecution {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Middleware for ToolExecution {
    fn name(&self) -> &'static str {
        "tool_execution"
    }

    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), AgentError> {
        let calls = match ctx.messages.last() {
            Some(m) if m.has_tool_calls() => m.tool_calls.clone(),
            last => {
                let text = last.map(|m| m.text().to_string()).unwrap_or_default();
                ctx.finish(text);
                return next.run(ctx).await;
            }
        };

        let results = self
            .dispatcher
            .dispatch(&calls, &ctx.tools, &ctx.agent_name, &mut ctx.exec)
            .await?;
        ctx.messages.extend(results);
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    use crate::agents::ToolPermission;
    use crate::core::{ExecutionContext, RunOutcome};
    use crate::llm::{Message, ToolCall};
    use crate::middleware::Pipeline;
    use crate::session::{EventHub, EventLogger, MemoryStorage};
    use crate::tools::{builtin_registry, Delegator, DispatchConfig};
    use serde_json::json;

    struct Unused;

    #[async_trait]
    impl Delegator for Unused {
        async fn delegate(&self, _: &str, _: &str, _: ExecutionContext) -> Result<RunOutcome, AgentError> {
            Err(AgentError::Internal("unused".into()))
        }
    }

    fn pipeline() -> Pipeline {
        let logger = EventLogger::new(Arc::new(MemoryStorage::new()), Arc::new(EventHub::new()));
        let dispatcher = ToolDispatcher::new(DispatchConfig::default(), logger, Weak::<Unused>::new());
        Pipeline::new().with(ToolExecution::new(Arc::new(dispatcher)))
    }

    fn ctx() -> MiddlewareContext {
        let mut ctx = MiddlewareContext::new("w", "p", ExecutionContext::root("s", 5));
        ctx.tools = builtin_registry(&[]).filter_for_agent(&ToolPermission::Named(vec!["echo".into()]));
        ctx
    }

    #[tokio::test]
    async fn test_plain_reply_finishes_run() {
        let mut ctx = ctx();
        ctx.messages.push(Message::assistant("all done"));
        pipeline().run(&mut ctx).await.unwrap();
        assert_eq!(ctx.result.as_deref(), Some("all done"));
        assert!(!ctx.should_continue);
    }

    #[tokio::test]
    async fn test_tool_calls_append_results_and_continue() {
        let mut ctx = ctx();
        ctx.messages.push(Message::assistant_with_tools(
            None,
            vec![
                ToolCall::new("c1", "echo", json!({"text": "hi"})),
                ToolCall::new("c2", "nope", json!({})),
            ],
        ));
        pipeline().run(&mut ctx).await.unwrap();

        assert!(ctx.result.is_none());
        assert!(ctx.should_continue);
        assert_eq!(ctx.messages.len(), 3);
        assert_eq!(ctx.messages[1].text(), "hi");
        assert!(ctx.messages[2].text().contains("Unknown tool: nope"));
    }
}
