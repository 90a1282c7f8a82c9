//! 安全限制：每轮迭代在调用模型前检查
//!
//! - 深度达到上限：正常结束，result 为说明文本
//! - 迭代次数超过上限：致命错误
//! - 迭代次数在警告线与上限之间：告警后继续
//! - token 估算超过上限：致命错误
//!
//! 有效深度上限 = min(上下文上限, Agent 覆盖值, 配置上限)；token 估算 = 消息 JSON 长度 / 4，
//! 上限优先取模型报告的上下文窗口。

use async_trait::async_trait;

use crate::config::SafetyConfig;
use crate::core::{AgentError, SafetyLimitKind};
use crate::llm::Message;
use crate::middleware::{Middleware, MiddlewareContext, Next};

pub struct SafetyGovernor {
    limits: SafetyConfig,
}

impl SafetyGovernor {
    pub fn new(limits: SafetyConfig) -> Self {
        Self { limits }
    }

    /// 到达警告线且尚未到最后一轮；最后一轮不再告警
    fn should_warn(&self, iteration: u32) -> bool {
        iteration >= self.limits.warn_at_iteration && iteration < self.limits.max_iterations
    }
}

/// 粗略 token 估算：序列化后的字符数 / 4
pub fn estimate_tokens(messages: &[Message]) -> usize {
    serde_json::to_string(messages).map(|s| s.len()).unwrap_or(0) / 4
}

pub fn depth_limit_message(max_depth: usize) -> String {
    format!("Max delegation depth ({max_depth}) reached. Consider breaking task into smaller parts.")
}

#[async_trait]
impl Middleware for SafetyGovernor {
    fn name(&self) -> &'static str {
        "safety"
    }

    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), AgentError> {
        let max_depth = ctx
            .exec
            .effective_max_depth(ctx.agent()?.max_depth)
            .min(self.limits.max_depth);
        if ctx.exec.depth >= max_depth {
            tracing::warn!(
                agent = %ctx.agent_name,
                depth = ctx.exec.depth,
                max_depth,
                "delegation depth limit reached, stopping"
            );
            ctx.finish(depth_limit_message(max_depth));
            return Ok(());
        }

        let max_iterations = self.limits.max_iterations;
        if ctx.iteration > max_iterations {
            return Err(AgentError::SafetyLimit {
                kind: SafetyLimitKind::Iterations,
                message: format!(
                    "agent '{}' exceeded {} iterations",
                    ctx.agent_name, max_iterations
                ),
            });
        }
        if self.should_warn(ctx.iteration) {
            tracing::warn!(
                agent = %ctx.agent_name,
                iteration = ctx.iteration,
                max_iterations,
                "approaching iteration limit"
            );
        }

        let estimate = estimate_tokens(&ctx.messages);
        let ceiling = ctx
            .provider
            .as_ref()
            .and_then(|p| p.context_window())
            .unwrap_or(self.limits.max_tokens_estimate);
        ctx.diagnostics.token_estimate = estimate;
        if estimate > ceiling {
            return Err(AgentError::SafetyLimit {
                kind: SafetyLimitKind::TokenEstimate,
                message: format!(
                    "estimated {estimate} tokens exceeds the limit of {ceiling} for agent '{}'",
                    ctx.agent_name
                ),
            });
        }

        next.run(ctx).await
    }
}
