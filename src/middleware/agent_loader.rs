//! 加载 Agent 定义并收窄工具集（每次 run 只做一次）

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::AgentResolver;
use crate::core::AgentError;
use crate::middleware::{Middleware, MiddlewareContext, Next};
use crate::tools::ToolRegistry;

pub struct AgentLoader {
    resolver: AgentResolver,
    registry: Arc<ToolRegistry>,
}

impl AgentLoader {
    pub fn new(resolver: AgentResolver, registry: Arc<ToolRegistry>) -> Self {
        Self { resolver, registry }
    }
}

#[async_trait]
impl Middleware for AgentLoader {
    fn name(&self) -> &'static str {
        "agent_loader"
    }

    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), AgentError> {
        if ctx.agent.is_none() {
            let agent = self.resolver.resolve(&ctx.agent_name).await;
            ctx.tools = self.registry.filter_for_agent(&agent.tools);
            ctx.diagnostics.sampling = agent.sampling();
            ctx.exec.tighten_max_depth(agent.max_depth);
            tracing::info!(
                agent = %ctx.agent_name,
                resolved = %agent.name,
                depth = ctx.exec.depth,
                max_depth = ctx.exec.max_depth,
                tools = ?ctx.tools.names(),
                "agent loaded"
            );
            ctx.agent = Some(agent);
        }
        next.run(ctx).await
    }
}
