//! Agent 定义、定义来源与按名解析

pub mod definition;
pub mod resolver;
pub mod source;

pub use definition::{AgentDefinition, BehaviorPreset, ToolPermission, DEFAULT_AGENT_NAME};
pub use resolver::AgentResolver;
pub use source::{
    parse_agent_markdown, AgentSource, AgentSourceError, InlineAgentSource, MarkdownAgentSource,
};
