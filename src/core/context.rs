//! 执行上下文：沿委派树向下传递的记录
//!
//! 子上下文由父上下文派生（depth + 1、同一 trace_id、parent_call_id 为委派调用 id），
//! 派生不修改父上下文；子运行结束后父级显式合并子树新增的用量。

use chrono::{DateTime, Utc};

use crate::llm::{Message, UsageMetrics};
use crate::session::EventMetadata;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub session_id: String,
    /// 根为 0
    pub depth: usize,
    pub max_depth: usize,
    pub parent_agent: Option<String>,
    pub started_at: DateTime<Utc>,
    pub trace_id: String,
    /// 触发本次运行的 delegate 调用 id
    pub parent_call_id: Option<String>,
    pub is_sidechain: bool,
    /// 累计用量：包含祖先在派生时已有的部分
    pub usage: UsageMetrics,
}

impl ExecutionContext {
    pub fn root(session_id: impl Into<String>, max_depth: usize) -> Self {
        Self {
            session_id: session_id.into(),
            depth: 0,
            max_depth,
            parent_agent: None,
            started_at: Utc::now(),
            trace_id: uuid::Uuid::new_v4().to_string(),
            parent_call_id: None,
            is_sidechain: false,
            usage: UsageMetrics::default(),
        }
    }

    /// 为一次委派派生子上下文
    pub fn child(&self, parent_agent: &str, call_id: &str) -> Self {
        Self {
            session_id: self.session_id.clone(),
            depth: self.depth + 1,
            max_depth: self.max_depth,
            parent_agent: Some(parent_agent.to_string()),
            started_at: Utc::now(),
            trace_id: self.trace_id.clone(),
            parent_call_id: Some(call_id.to_string()),
            is_sidechain: true,
            usage: self.usage,
        }
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    /// 上下文上限与 Agent 覆盖值取较小者
    pub fn effective_max_depth(&self, agent_override: Option<usize>) -> usize {
        match agent_override {
            Some(d) => self.max_depth.min(d),
            None => self.max_depth,
        }
    }

    /// 收紧本运行的深度上限；之后派生的子上下文继承收紧后的值，只能更小不能放宽
    pub fn tighten_max_depth(&mut self, agent_override: Option<usize>) {
        self.max_depth = self.effective_max_depth(agent_override);
    }

    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }

    /// 事件元数据（委派树位置）
    pub fn event_metadata(&self, agent: &str) -> EventMetadata {
        EventMetadata {
            agent: Some(agent.to_string()),
            depth: Some(self.depth),
            trace_id: Some(self.trace_id.clone()),
            parent_call_id: self.parent_call_id.clone(),
            sidechain: self.is_sidechain,
            ..Default::default()
        }
    }
}

/// 一次 run 的结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result: String,
    /// 运行结束时的累计用量（含派生时继承的部分）
    pub usage: UsageMetrics,
    pub iterations: u32,
    pub messages: Vec<Message>,
}
