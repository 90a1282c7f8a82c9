//! 首轮初始化对话：system prompt（不写入事件日志）+ 用户消息（写入）
//!
//! 恢复的会话已有历史时，system prompt 插到历史最前面。

use async_trait::async_trait;

use crate::agents::AgentDefinition;
use crate::core::{AgentError, ExecutionContext};
use crate::llm::{Message, Role};
use crate::middleware::{Middleware, MiddlewareContext, Next};
use crate::session::{EventLogger, EventPayload, SessionEvent};
use crate::tools::ToolSet;

pub struct ContextSetup {
    logger: EventLogger,
}

impl ContextSetup {
    pub fn new(logger: EventLogger) -> Self {
        Self { logger }
    }
}

/// Agent 提示词 + 可用工具 + 角色协议
pub fn build_system_prompt(agent: &AgentDefinition, tools: &ToolSet, exec: &ExecutionContext) -> String {
    let mut prompt = agent.prompt.trim().to_string();
    prompt.push_str("\n\n## SYSTEM INSTRUCTIONS\n\n### AVAILABLE TOOLS\n");

    if tools.is_empty() {
        prompt.push_str("You have no tools available. Provide your response as text only.");
    } else {
        prompt.push_str(&format!(
            "You have access to ONLY the following tools: {}\n",
            tools.names().join(", ")
        ));
        for (name, description) in tools.descriptions() {
            let first_line = description.lines().next().unwrap_or("");
            prompt.push_str(&format!("- {name}: {first_line}\n"));
        }
    }

    match &exec.parent_agent {
        Some(parent) => prompt.push_str(&format!(
            "\n\n### YOU ARE A DELEGATED AGENT\n\
             You were called by {parent} to complete a specific task. \
             Your final text response is returned to {parent} as the result of the delegation.\n\
             Use tools to do the work, then answer with a text summary and no further tool calls."
        )),
        None => prompt.push_str(
            "\n\n### ORCHESTRATION PROTOCOL\n\
             You manage the overall workflow. When you delegate to another agent, \
             its answer comes back as the tool result; use it to complete the task.",
        ),
    }
    prompt
}

#[async_trait]
impl Middleware for ContextSetup {
    fn name(&self) -> &'static str {
        "context_setup"
    }

    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), AgentError> {
        if ctx.iteration == 1 {
            let system = build_system_prompt(ctx.agent()?, &ctx.tools, &ctx.exec);
            if ctx.messages.first().map(|m| m.role) != Some(Role::System) {
                ctx.messages.insert(0, Message::system(system));
            }

            if !ctx.prompt.trim().is_empty() {
                ctx.messages.push(Message::user(ctx.prompt.clone()));
                let event = SessionEvent::new(EventPayload::User {
                    content: ctx.prompt.clone(),
                })
                .with_metadata(ctx.exec.event_metadata(&ctx.agent_name));
                self.logger.log(&ctx.exec.session_id, event).await;
            }
        }
        next.run(ctx).await
    }
}
