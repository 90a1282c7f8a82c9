//! Agent 执行器
//!
//! 把中间件管线、工具调度与会话日志串成「迭代直到完成」的状态机：
//! run / resume 是根级入口，delegate（Delegator）是调度器递归进入的入口。
//! 执行器与调度器互相引用，调度器只持有 Weak，构造时用 Arc::new_cyclic 打通。

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::agents::AgentResolver;
use crate::config::SafetyConfig;
use crate::core::{AgentError, ExecutionContext, RunOutcome, ShutdownManager};
use crate::llm::{Message, ProviderFactory, Role};
use crate::middleware::{
    AgentLoader, ContextSetup, ErrorBoundary, LlmCall, MiddlewareContext, PendingCalls, Pipeline,
    ProviderSelection, SafetyGovernor, ToolExecution,
};
use crate::session::{
    recover_session, EventHub, EventLogger, EventPayload, SessionEvent, SessionStorage,
};
use crate::tools::{Delegator, DispatchConfig, ToolDispatcher, ToolRegistry};

/// 构造执行器所需的协作方
pub struct ExecutorParts {
    pub resolver: AgentResolver,
    pub registry: Arc<ToolRegistry>,
    pub factory: Arc<dyn ProviderFactory>,
    pub storage: Arc<dyn SessionStorage>,
    pub hub: Arc<EventHub>,
    pub safety: SafetyConfig,
    pub dispatch: DispatchConfig,
    pub shutdown: ShutdownManager,
}

pub struct AgentExecutor {
    pipeline: Pipeline,
    logger: EventLogger,
    resolver: AgentResolver,
    safety: SafetyConfig,
    shutdown: ShutdownManager,
}

impl AgentExecutor {
    pub fn new(parts: ExecutorParts) -> Arc<Self> {
        let ExecutorParts {
            resolver,
            registry,
            factory,
            storage,
            hub,
            safety,
            dispatch,
            shutdown,
        } = parts;
        let logger = EventLogger::new(storage, hub);

        Arc::new_cyclic(|weak: &Weak<AgentExecutor>| {
            let delegator: Weak<dyn Delegator> = weak.clone();
            let dispatcher = Arc::new(ToolDispatcher::new(dispatch, logger.clone(), delegator));
            let pipeline = Pipeline::new()
                .with(ErrorBoundary::new(logger.clone()))
                .with(AgentLoader::new(resolver.clone(), registry))
                .with(ProviderSelection::new(factory))
                .with(PendingCalls::new(Arc::clone(&dispatcher)))
                .with(ContextSetup::new(logger.clone()))
                .with(SafetyGovernor::new(safety))
                .with(LlmCall::new(logger.clone()))
                .with(ToolExecution::new(dispatcher));
            AgentExecutor {
                pipeline,
                logger,
                resolver,
                safety,
                shutdown,
            }
        })
    }

    pub fn logger(&self) -> &EventLogger {
        &self.logger
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        self.logger.storage()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn list_agents(&self) -> Vec<String> {
        self.resolver.list_agents().await
    }

    fn ensure_accepting(&self) -> Result<(), AgentError> {
        if self.shutdown.is_shutdown() {
            return Err(AgentError::ShuttingDown);
        }
        Ok(())
    }

    /// 根级运行：新的执行上下文，空历史
    pub async fn run(
        &self,
        agent: &str,
        prompt: &str,
        session_id: &str,
    ) -> Result<RunOutcome, AgentError> {
        self.ensure_accepting()?;
        let exec = ExecutionContext::root(session_id, self.safety.max_depth);
        self.execute(MiddlewareContext::new(agent, prompt, exec)).await
    }

    /// 恢复会话：重建历史，补执行中断的调用，然后继续
    ///
    /// 会话已完整且没有新的 prompt 时不调用模型，直接返回最后一条回复。
    pub async fn resume(
        &self,
        session_id: &str,
        agent: &str,
        prompt: Option<&str>,
    ) -> Result<RunOutcome, AgentError> {
        self.ensure_accepting()?;
        let recovered = recover_session(self.storage().as_ref(), session_id)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;

        let prompt = prompt.map(str::trim).filter(|p| !p.is_empty());
        if !recovered.is_incomplete() && prompt.is_none() {
            let result = recovered
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant && !m.has_tool_calls())
                .map(|m| m.text().to_string())
                .unwrap_or_default();
            return Ok(RunOutcome {
                result,
                usage: Default::default(),
                iterations: 0,
                messages: recovered.messages,
            });
        }

        let exec = ExecutionContext::root(session_id, self.safety.max_depth);
        let ctx = MiddlewareContext::new(agent, prompt.unwrap_or_default(), exec)
            .resumed(recovered.messages, recovered.pending);
        self.execute(ctx).await
    }

    /// 迭代直到管线给出结果；致命错误原样返回
    async fn execute(&self, mut ctx: MiddlewareContext) -> Result<RunOutcome, AgentError> {
        let session_id = ctx.exec.session_id.clone();
        let agent = ctx.agent_name.clone();
        tracing::info!(
            agent = %agent,
            depth = ctx.exec.depth,
            trace_id = %ctx.exec.trace_id,
            resumed = ctx.resumed,
            "agent started"
        );
        self.logger
            .log(
                &session_id,
                SessionEvent::new(EventPayload::AgentStart {
                    agent: agent.clone(),
                    prompt: ctx.prompt.clone(),
                })
                .with_metadata(ctx.exec.event_metadata(&agent)),
            )
            .await;

        while ctx.should_continue {
            // 关闭开始后不再进入下一轮；已经完成的步骤都已写入事件日志，可用 resume 继续
            if self.shutdown.is_shutdown() {
                tracing::info!(
                    agent = %agent,
                    depth = ctx.exec.depth,
                    iterations = ctx.iteration,
                    "shutdown in progress, stopping run"
                );
                return Err(AgentError::ShuttingDown);
            }
            ctx.iteration += 1;
            self.logger
                .log(
                    &session_id,
                    SessionEvent::new(EventPayload::AgentIteration {
                        agent: agent.clone(),
                        iteration: ctx.iteration,
                    })
                    .with_metadata(ctx.exec.event_metadata(&agent)),
                )
                .await;

            self.pipeline.run(&mut ctx).await?;
            if ctx.result.is_some() {
                break;
            }
        }

        let result = ctx.result.take().unwrap_or_default();
        tracing::info!(
            agent = %agent,
            depth = ctx.exec.depth,
            iterations = ctx.iteration,
            total_tokens = ctx.exec.usage.total_tokens,
            elapsed_ms = ctx.exec.elapsed_ms(),
            "agent completed"
        );
        self.logger
            .log(
                &session_id,
                SessionEvent::new(EventPayload::AgentComplete {
                    agent: agent.clone(),
                    result: result.clone(),
                    iterations: ctx.iteration,
                })
                .with_metadata(ctx.exec.event_metadata(&agent)),
            )
            .await;

        Ok(RunOutcome {
            result,
            usage: ctx.exec.usage,
            iterations: ctx.iteration,
            messages: ctx.messages,
        })
    }
}

#[async_trait]
impl Delegator for AgentExecutor {
    /// 子 Agent 从空历史开始，只拿到委派的 prompt
    async fn delegate(
        &self,
        agent: &str,
        prompt: &str,
        ctx: ExecutionContext,
    ) -> Result<RunOutcome, AgentError> {
        self.execute(MiddlewareContext::new(agent, prompt, ctx)).await
    }
}

/// 最后一条 assistant 文本
pub fn final_text(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && !m.has_tool_calls())
        .map(|m| m.text())
}
