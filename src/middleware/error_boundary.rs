//! 错误边界：记录 agent_error 事件后原样向上返回

use async_trait::async_trait;

use crate::core::AgentError;
use crate::middleware::{Middleware, MiddlewareContext, Next};
use crate::session::{EventLogger, EventPayload, SessionEvent};

pub struct ErrorBoundary {
    logger: EventLogger,
}

impl ErrorBoundary {
    pub fn new(logger: EventLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Middleware for ErrorBoundary {
    fn name(&self) -> &'static str {
        "error_boundary"
    }

    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), AgentError> {
        let Err(error) = next.run(ctx).await else {
            return Ok(());
        };
        tracing::error!(
            agent = %ctx.agent_name,
            depth = ctx.exec.depth,
            iteration = ctx.iteration,
            error = %error,
            "agent run failed"
        );
        let event = SessionEvent::new(EventPayload::AgentError {
            agent: ctx.agent_name.clone(),
            error: error.to_string(),
        })
        .with_metadata(ctx.exec.event_metadata(&ctx.agent_name));
        self.logger.log(&ctx.exec.session_id, event).await;
        Err(error)
    }
}
