//! 按名解析 Agent：找不到（或来源出错）时退回内置 default，从不失败

use std::sync::Arc;

use crate::agents::{AgentDefinition, AgentSource, DEFAULT_AGENT_NAME};

#[derive(Clone)]
pub struct AgentResolver {
    source: Arc<dyn AgentSource>,
}

impl AgentResolver {
    pub fn new(source: Arc<dyn AgentSource>) -> Self {
        Self { source }
    }

    pub async fn resolve(&self, name: &str) -> AgentDefinition {
        if name == DEFAULT_AGENT_NAME {
            return AgentDefinition::builtin_default();
        }
        match self.source.load_agent(name).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                tracing::info!(agent = %name, "agent not found, using default agent as fallback");
                AgentDefinition::fallback_for(name)
            }
            Err(e) => {
                tracing::warn!(agent = %name, error = %e, "failed to load agent, using default agent as fallback");
                AgentDefinition::fallback_for(name)
            }
        }
    }

    pub async fn list_agents(&self) -> Vec<String> {
        self.source.list_agents().await
    }
}
