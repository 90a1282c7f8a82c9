//! 工具调度：执行一次模型回复中的全部工具调用
//!
//! 调用按并发安全性分成两组（组内保持原顺序）：安全组先执行，受 max_concurrent_tools
//! 限制并发；非安全组随后逐个执行，每个结果落盘后才开始下一个。返回的 tool 消息
//! 始终按原调用顺序排列。
//!
//! delegate 永远是非安全调用，不会直接执行：调度器拦截它并通过 Delegator 递归调用执行器。
//! 工具失败、参数错误、超时、未知工具都变成 is_error 的结果交还模型；只有子 Agent 的
//! 致命错误会向上传播。

use std::sync::Weak;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::core::{AgentError, ExecutionContext, RunOutcome};
use crate::llm::{Message, ToolCall};
use crate::session::{EventLogger, EventMetadata, EventPayload, SessionEvent};
use crate::tools::{DelegateArgs, ToolSet, DELEGATE_TOOL_NAME};

/// 委派入口：由执行器实现
#[async_trait]
pub trait Delegator: Send + Sync {
    async fn delegate(
        &self,
        agent: &str,
        prompt: &str,
        ctx: ExecutionContext,
    ) -> Result<RunOutcome, AgentError>;
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub max_concurrent_tools: usize,
    pub tool_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tools: 5,
            tool_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ToolDispatcher {
    config: DispatchConfig,
    logger: EventLogger,
    delegator: Weak<dyn Delegator>,
}

/// 单个工具的执行结果
struct ToolOutcome {
    content: String,
    is_error: bool,
}

impl ToolOutcome {
    fn ok(content: String) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: json!({ "error": message.to_string() }).to_string(),
            is_error: true,
        }
    }
}

impl ToolDispatcher {
    pub fn new(config: DispatchConfig, logger: EventLogger, delegator: Weak<dyn Delegator>) -> Self {
        Self {
            config,
            logger,
            delegator,
        }
    }

    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    fn is_safe(call: &ToolCall, tools: &ToolSet) -> bool {
        call.name != DELEGATE_TOOL_NAME
            && tools
                .get(&call.name)
                .map(|t| t.is_concurrency_safe())
                .unwrap_or(false)
    }

    /// 执行一轮调用，返回按调用顺序排列的 tool 消息
    pub async fn dispatch(
        &self,
        calls: &[ToolCall],
        tools: &ToolSet,
        agent: &str,
        exec: &mut ExecutionContext,
    ) -> Result<Vec<Message>, AgentError> {
        let (safe, sequential): (Vec<usize>, Vec<usize>) =
            (0..calls.len()).partition(|&i| Self::is_safe(&calls[i], tools));
        let mut results: Vec<Option<Message>> = vec![None; calls.len()];

        tracing::debug!(
            agent = %agent,
            depth = exec.depth,
            safe = safe.len(),
            sequential = sequential.len(),
            "dispatching tool calls"
        );

        if !safe.is_empty() {
            let session_id = exec.session_id.clone();
            let metadata = exec.event_metadata(agent);
            let permits = Semaphore::new(self.config.max_concurrent_tools.max(1));
            let batch = safe.iter().map(|&i| {
                let call = &calls[i];
                let (permits, session_id, metadata) = (&permits, &session_id, &metadata);
                async move {
                    let _permit = permits.acquire().await.ok();
                    let message = self.run_tool(call, tools, session_id, metadata).await;
                    (i, message)
                }
            });
            for (i, message) in join_all(batch).await {
                results[i] = Some(message);
            }
        }

        for i in sequential {
            let call = &calls[i];
            let message = if call.name == DELEGATE_TOOL_NAME && tools.contains(DELEGATE_TOOL_NAME) {
                self.run_delegation(call, agent, exec).await?
            } else {
                let metadata = exec.event_metadata(agent);
                self.run_tool(call, tools, &exec.session_id, &metadata).await
            };
            results[i] = Some(message);
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn log_call(&self, session_id: &str, call: &ToolCall, metadata: &EventMetadata) {
        let event = SessionEvent::new(EventPayload::ToolCall {
            id: call.id.clone(),
            tool: call.name.clone(),
            params: call.arguments.clone(),
        })
        .with_metadata(metadata.clone());
        self.logger.log(session_id, event).await;
    }

    async fn log_result(
        &self,
        session_id: &str,
        call: &ToolCall,
        outcome: &ToolOutcome,
        metadata: &EventMetadata,
        latency_ms: u64,
    ) {
        let event = SessionEvent::new(EventPayload::ToolResult {
            tool_call_id: call.id.clone(),
            tool: call.name.clone(),
            result: outcome.content.clone(),
            is_error: outcome.is_error,
        })
        .with_metadata(EventMetadata {
            latency_ms: Some(latency_ms),
            ..metadata.clone()
        });
        self.logger.log(session_id, event).await;
    }

    /// 普通工具：记录调用 → 执行 → 记录结果
    async fn run_tool(
        &self,
        call: &ToolCall,
        tools: &ToolSet,
        session_id: &str,
        metadata: &EventMetadata,
    ) -> Message {
        self.log_call(session_id, call, metadata).await;
        let start = Instant::now();
        let outcome = self.execute(call, tools).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let audit = json!({
            "event": "tool_audit",
            "tool": call.name,
            "tool_call_id": call.id,
            "ok": !outcome.is_error,
            "duration_ms": duration_ms,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");

        self.log_result(session_id, call, &outcome, metadata, duration_ms)
            .await;
        Message::tool(call.id.clone(), outcome.content)
    }

    async fn execute(&self, call: &ToolCall, tools: &ToolSet) -> ToolOutcome {
        let Some(tool) = tools.get(&call.name) else {
            return ToolOutcome::error(format!("Unknown tool: {}", call.name));
        };
        let args = match &call.arguments {
            Value::Null => json!({}),
            Value::Object(_) => call.arguments.clone(),
            _ => {
                return ToolOutcome::error(format!(
                    "Invalid arguments for tool '{}': expected a JSON object",
                    call.name
                ))
            }
        };
        match timeout(self.config.tool_timeout, tool.execute(args)).await {
            Ok(Ok(content)) => ToolOutcome::ok(content),
            Ok(Err(e)) => ToolOutcome::error(e),
            Err(_) => ToolOutcome::error(format!(
                "Tool '{}' timed out after {}s",
                call.name,
                self.config.tool_timeout.as_secs()
            )),
        }
    }

    /// delegate：派生子上下文递归执行，合并子树用量
    async fn run_delegation(
        &self,
        call: &ToolCall,
        agent: &str,
        exec: &mut ExecutionContext,
    ) -> Result<Message, AgentError> {
        let metadata = exec.event_metadata(agent);
        self.log_call(&exec.session_id, call, &metadata).await;
        let start = Instant::now();

        let args = match DelegateArgs::parse(&call.arguments) {
            Ok(a) => a,
            Err(e) => {
                let outcome = ToolOutcome::error(e);
                self.log_result(&exec.session_id, call, &outcome, &metadata, 0)
                    .await;
                return Ok(Message::tool(call.id.clone(), outcome.content));
            }
        };
        let delegator = self.delegator.upgrade().ok_or_else(|| {
            AgentError::Internal("agent executor dropped during delegation".to_string())
        })?;

        self.logger
            .log(
                &exec.session_id,
                SessionEvent::new(EventPayload::Delegation {
                    from: agent.to_string(),
                    to: args.agent.clone(),
                    call_id: call.id.clone(),
                    prompt: args.prompt.clone(),
                })
                .with_metadata(metadata.clone()),
            )
            .await;
        tracing::info!(
            from = %agent,
            to = %args.agent,
            depth = exec.depth + 1,
            description = args.description.as_deref().unwrap_or(""),
            "delegating"
        );

        let snapshot = exec.usage;
        let child = exec.child(agent, &call.id);
        let outcome = delegator.delegate(&args.agent, &args.prompt, child).await?;
        exec.usage.merge(&outcome.usage.delta_since(&snapshot));

        self.logger
            .log(
                &exec.session_id,
                SessionEvent::new(EventPayload::DelegationComplete {
                    from: agent.to_string(),
                    to: args.agent.clone(),
                    call_id: call.id.clone(),
                    is_error: false,
                })
                .with_metadata(EventMetadata {
                    usage: Some(outcome.usage.delta_since(&snapshot)),
                    ..metadata.clone()
                }),
            )
            .await;

        let result = ToolOutcome::ok(outcome.result);
        let latency_ms = start.elapsed().as_millis() as u64;
        self.log_result(&exec.session_id, call, &result, &metadata, latency_ms)
            .await;
        Ok(Message::tool(call.id.clone(), result.content))
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::agents::ToolPermission;
    use crate::llm::UsageMetrics;
    use crate::session::{EventHub, MemoryStorage, SessionStorage};
    use crate::tools::{DelegateTool, EchoTool, Tool, ToolRegistry};

    /// 记录执行顺序与并发峰值的工具
    struct TimedTool {
        name: &'static str,
        safe: bool,
        delay_ms: u64,
        log: Arc<Mutex<Vec<&'static str>>>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for TimedTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "timed"
        }
        fn is_concurrency_safe(&self) -> bool {
            self.safe
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            self.log.lock().unwrap().push(self.name);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("{}-done", self.name))
        }
    }

    struct Fixture {
        storage: Arc<MemoryStorage>,
        log: Arc<Mutex<Vec<&'static str>>>,
        peak: Arc<AtomicUsize>,
        registry: ToolRegistry,
    }

    impl Fixture {
        fn new(tools: &[(&'static str, bool, u64)]) -> Self {
            let log = Arc::new(Mutex::new(Vec::new()));
            let in_flight = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let mut registry = ToolRegistry::new();
            for &(name, safe, delay_ms) in tools {
                registry.register(TimedTool {
                    name,
                    safe,
                    delay_ms,
                    log: log.clone(),
                    in_flight: in_flight.clone(),
                    peak: peak.clone(),
                });
            }
            Self {
                storage: Arc::new(MemoryStorage::new()),
                log,
                peak,
                registry,
            }
        }

        fn dispatcher(&self, max_concurrent_tools: usize, delegator: Weak<dyn Delegator>) -> ToolDispatcher {
            ToolDispatcher::new(
                DispatchConfig {
                    max_concurrent_tools,
                    tool_timeout: Duration::from_secs(5),
                },
                EventLogger::new(self.storage.clone(), Arc::new(EventHub::new())),
                delegator,
            )
        }
    }

    fn no_delegator() -> Weak<dyn Delegator> {
        Weak::<NoDelegation>::new()
    }

    struct NoDelegation;

    #[async_trait]
    impl Delegator for NoDelegation {
        async fn delegate(&self, _: &str, _: &str, _: ExecutionContext) -> Result<RunOutcome, AgentError> {
            Err(AgentError::Internal("unused".into()))
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, json!({}))
    }

    #[tokio::test]
    async fn test_safe_first_then_sequential_results_in_call_order() {
        let fx = Fixture::new(&[("a", true, 30), ("b", false, 1), ("c", true, 1)]);
        let tools = fx.registry.filter_for_agent(&ToolPermission::All);
        let mut exec = ExecutionContext::root("s", 5);

        let calls = vec![call("1", "a"), call("2", "b"), call("3", "c")];
        let messages = fx
            .dispatcher(5, no_delegator())
            .dispatch(&calls, &tools, "agent", &mut exec)
            .await
            .unwrap();

        let ids: Vec<_> = messages.iter().map(|m| m.tool_call_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(messages[1].text(), "b-done");

        let order = fx.log.lock().unwrap().clone();
        assert_eq!(order.last(), Some(&"b"));
        assert_eq!(fx.peak.load(Ordering::SeqCst), 2);

        let events = fx.storage.read_all("s").await.unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind().to_string()).collect();
        assert_eq!(kinds.iter().filter(|k| *k == "tool_call").count(), 3);
        assert_eq!(kinds.iter().filter(|k| *k == "tool_result").count(), 3);
        assert_eq!(kinds.last().map(String::as_str), Some("tool_result"));
    }

    #[tokio::test]
    async fn test_safe_batch_respects_concurrency_limit() {
        let fx = Fixture::new(&[("x", true, 20), ("y", true, 20), ("z", true, 20)]);
        let tools = fx.registry.filter_for_agent(&ToolPermission::All);
        let mut exec = ExecutionContext::root("s", 5);
        let calls = vec![call("1", "x"), call("2", "y"), call("3", "z")];

        fx.dispatcher(1, no_delegator())
            .dispatch(&calls, &tools, "agent", &mut exec)
            .await
            .unwrap();
        assert_eq!(fx.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_become_tool_results() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let storage = Arc::new(MemoryStorage::new());
        let dispatcher = ToolDispatcher::new(
            DispatchConfig::default(),
            EventLogger::new(storage.clone(), Arc::new(EventHub::new())),
            no_delegator(),
        );
        let tools = registry.filter_for_agent(&ToolPermission::All);
        let mut exec = ExecutionContext::root("s", 5);

        let calls = vec![
            ToolCall::new("1", "nope", json!({})),
            ToolCall::new("2", "echo", Value::String("{broken".into())),
            ToolCall::new("3", "echo", json!({"wrong": 1})),
        ];
        let messages = dispatcher
            .dispatch(&calls, &tools, "agent", &mut exec)
            .await
            .unwrap();

        assert_eq!(messages.len(), 3);
        assert!(messages[0].text().contains("Unknown tool: nope"));
        assert!(messages[1].text().contains("expected a JSON object"));
        assert!(messages[2].text().contains("error"));

        let events = storage.read_all("s").await.unwrap();
        let errors = events
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::ToolResult { is_error: true, .. }))
            .count();
        assert_eq!(errors, 3);
    }

    struct FixedDelegator {
        usage: UsageMetrics,
    }

    #[async_trait]
    impl Delegator for FixedDelegator {
        async fn delegate(&self, agent: &str, prompt: &str, ctx: ExecutionContext) -> Result<RunOutcome, AgentError> {
            assert_eq!(ctx.depth, 1);
            assert!(ctx.is_sidechain);
            let mut usage = ctx.usage;
            usage.merge(&self.usage);
            Ok(RunOutcome {
                result: format!("{agent} did {prompt}"),
                usage,
                iterations: 1,
                messages: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_delegation_merges_child_usage_delta() {
        let delegator: Arc<dyn Delegator> = Arc::new(FixedDelegator {
            usage: UsageMetrics::single_call(7, 3),
        });
        let mut registry = ToolRegistry::new();
        registry.register(DelegateTool::new(&[]));
        let storage = Arc::new(MemoryStorage::new());
        let dispatcher = ToolDispatcher::new(
            DispatchConfig::default(),
            EventLogger::new(storage.clone(), Arc::new(EventHub::new())),
            Arc::downgrade(&delegator),
        );
        let tools = registry.filter_for_agent(&ToolPermission::All);
        let mut exec = ExecutionContext::root("s", 5);
        exec.usage = UsageMetrics::single_call(100, 0);

        let calls = vec![ToolCall::new(
            "d1",
            DELEGATE_TOOL_NAME,
            json!({"agent": "worker", "prompt": "the job"}),
        )];
        let messages = dispatcher
            .dispatch(&calls, &tools, "boss", &mut exec)
            .await
            .unwrap();

        assert_eq!(messages[0].text(), "worker did the job");
        assert_eq!(exec.usage.prompt_tokens, 107);
        assert_eq!(exec.usage.model_calls, 2);

        let kinds: Vec<String> = storage
            .read_all("s")
            .await
            .unwrap()
            .iter()
            .map(|e| e.kind().to_string())
            .collect();
        assert_eq!(
            kinds,
            vec!["tool_call", "delegation", "delegation_complete", "tool_result"]
        );
    }

    #[tokio::test]
    async fn test_delegate_without_permission_is_unknown_tool() {
        let registry = ToolRegistry::new();
        let storage = Arc::new(MemoryStorage::new());
        let dispatcher = ToolDispatcher::new(
            DispatchConfig::default(),
            EventLogger::new(storage, Arc::new(EventHub::new())),
            no_delegator(),
        );
        let tools = registry.filter_for_agent(&ToolPermission::All);
        let mut exec = ExecutionContext::root("s", 5);
        let calls = vec![ToolCall::new("d1", DELEGATE_TOOL_NAME, json!({"agent": "w", "prompt": "p"}))];

        let messages = dispatcher
            .dispatch(&calls, &tools, "boss", &mut exec)
            .await
            .unwrap();
        assert!(messages[0].text().contains("Unknown tool: delegate"));
    }
}
