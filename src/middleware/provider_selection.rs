//! 选择模型提供方（每次 run 只做一次）
//!
//! Agent 指定了模型而无法构造时报 ModelUnavailable（点名 Agent、模型与修复方式）；
//! 默认模型构造失败则原样返回底层错误。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::ProviderFactory;
use crate::middleware::{Middleware, MiddlewareContext, Next};

pub struct ProviderSelection {
    factory: Arc<dyn ProviderFactory>,
}

impl ProviderSelection {
    pub fn new(factory: Arc<dyn ProviderFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl Middleware for ProviderSelection {
    fn name(&self) -> &'static str {
        "provider_selection"
    }

    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), AgentError> {
        if ctx.provider.is_none() {
            let agent = ctx.agent()?;
            let provider = match &agent.model {
                Some(model) => self.factory.create(model).map_err(|e| {
                    AgentError::ModelUnavailable {
                        agent: agent.name.clone(),
                        model: model.clone(),
                        reason: e.to_string(),
                    }
                })?,
                None => self.factory.create(self.factory.default_model())?,
            };
            tracing::debug!(agent = %ctx.agent_name, model = %provider.model_name(), "provider selected");
            ctx.diagnostics.model = Some(provider.model_name().to_string());
            ctx.provider = Some(provider);
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentDefinition;
    use crate::core::ExecutionContext;
    use crate::llm::{LlmError, MockProvider, StaticProviderFactory};
    use crate::middleware::Pipeline;

    fn ctx_with(agent: AgentDefinition) -> MiddlewareContext {
        let mut ctx = MiddlewareContext::new(agent.name.clone(), "p", ExecutionContext::root("s", 5));
        ctx.agent = Some(agent);
        ctx
    }

    fn factory() -> Arc<dyn ProviderFactory> {
        Arc::new(StaticProviderFactory::single(Arc::new(MockProvider::echo("mock"))))
    }

    #[tokio::test]
    async fn test_default_model() {
        let pipeline = Pipeline::new().with(ProviderSelection::new(factory()));
        let mut ctx = ctx_with(AgentDefinition::new("a", "p"));
        pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.diagnostics.model.as_deref(), Some("mock"));
    }

    #[tokio::test]
    async fn test_agent_model_unavailable_names_agent_and_model() {
        let pipeline = Pipeline::new().with(ProviderSelection::new(factory()));
        let mut ctx = ctx_with(AgentDefinition::new("reviewer", "p").with_model("big-model"));
        let err = pipeline.run(&mut ctx).await.unwrap_err();
        match err {
            AgentError::ModelUnavailable { agent, model, .. } => {
                assert_eq!(agent, "reviewer");
                assert_eq!(model, "big-model");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_default_model_failure_is_unchanged() {
        let broken: Arc<dyn ProviderFactory> = Arc::new(StaticProviderFactory::new("nothing"));
        let pipeline = Pipeline::new().with(ProviderSelection::new(broken));
        let mut ctx = ctx_with(AgentDefinition::new("a", "p"));
        let err = pipeline.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(LlmError::UnsupportedModel(_))));
    }
}
