//! 执行器端到端测试：Mock 模型 + 内联 Agent 定义 + 内存 / 文件会话存储

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use hive::agents::{AgentDefinition, AgentResolver, InlineAgentSource, ToolPermission};
use hive::config::SafetyConfig;
use hive::core::{AgentError, AgentExecutor, ExecutorParts, SafetyLimitKind, ShutdownManager};
use hive::llm::{
    Completion, CompletionRequest, Message, MockProvider, Role, StaticProviderFactory, ToolCall,
    UsageMetrics,
};
use hive::session::{
    recover_session, EventHub, EventPayload, FileStorage, MemoryStorage, SessionEvent,
    SessionStorage,
};
use hive::tools::{builtin_registry, DispatchConfig};

fn agents() -> InlineAgentSource {
    let delegate_only = || ToolPermission::Named(vec!["delegate".into()]);
    InlineAgentSource::new()
        .with_agent(AgentDefinition::new("root", "ROLE:root").with_tools(delegate_only()))
        .with_agent(AgentDefinition::new("a", "ROLE:a").with_tools(delegate_only()))
        .with_agent(AgentDefinition::new("b", "ROLE:b").with_tools(delegate_only()))
        .with_agent(
            AgentDefinition::new("helper", "ROLE:helper")
                .with_tools(ToolPermission::Named(vec!["echo".into(), "todo_write".into()])),
        )
        .with_agent(AgentDefinition::new("picky", "ROLE:picky").with_model("gpt-missing"))
        .with_agent(
            AgentDefinition::new("orchestrator", "ROLE:orchestrator")
                .with_tools(delegate_only())
                .with_max_depth(2),
        )
        .with_agent(AgentDefinition::new("worker", "ROLE:worker").with_tools(delegate_only()))
        .with_agent(AgentDefinition::new("leaf", "ROLE:leaf").with_tools(delegate_only()))
}

fn executor(
    provider: Arc<MockProvider>,
    storage: Arc<dyn SessionStorage>,
    safety: SafetyConfig,
) -> Arc<AgentExecutor> {
    AgentExecutor::new(ExecutorParts {
        resolver: AgentResolver::new(Arc::new(agents())),
        registry: Arc::new(builtin_registry(&["a".to_string(), "b".to_string()])),
        factory: Arc::new(StaticProviderFactory::single(provider)),
        storage,
        hub: Arc::new(EventHub::new()),
        safety,
        dispatch: DispatchConfig::default(),
        shutdown: ShutdownManager::new(),
    })
}

fn role_of(req: &CompletionRequest<'_>) -> String {
    req.messages
        .first()
        .filter(|m| m.role == Role::System)
        .and_then(|m| m.text().split("ROLE:").nth(1))
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or("")
        .to_string()
}

fn last_tool_text(req: &CompletionRequest<'_>) -> Option<String> {
    req.messages
        .last()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.text().to_string())
}

/// root → a → b、orchestrator → worker → leaf：每层委派下一层，收到结果后作答
fn chain_provider() -> MockProvider {
    MockProvider::new("mock", |req| {
        let role = role_of(req);
        if let Some(tool) = last_tool_text(req) {
            return Completion::text(format!("{role} got [{tool}]"));
        }
        let next = match role.as_str() {
            "root" => "a",
            "a" => "b",
            "orchestrator" => "worker",
            "worker" => "leaf",
            _ => return Completion::text(format!("{role} answered")),
        };
        Completion::tool_calls(
            None,
            vec![ToolCall::new(
                format!("call-{role}"),
                "delegate",
                json!({"agent": next, "prompt": format!("help {role}")}),
            )],
        )
    })
}

#[tokio::test]
async fn test_usage_aggregates_across_delegation_tree() {
    let provider = Arc::new(chain_provider().with_usage_per_call(UsageMetrics::single_call(10, 5)));
    let storage = Arc::new(MemoryStorage::new());
    let exec = executor(provider.clone(), storage.clone(), SafetyConfig::default());

    let outcome = exec.run("root", "start", "chain").await.unwrap();

    assert_eq!(outcome.result, "root got [a got [b answered]]");
    assert_eq!(provider.call_count(), 5);
    assert_eq!(outcome.usage.model_calls, 5);
    assert_eq!(outcome.usage.prompt_tokens, 50);
    assert_eq!(outcome.usage.completion_tokens, 25);
    assert_eq!(outcome.usage.total_tokens, 75);

    // 子 Agent 的事件标记为 sidechain，不进入根级历史
    let events = storage.read_all("chain").await.unwrap();
    assert!(events.iter().any(|e| e.is_sidechain()));
    let recovered = recover_session(storage.as_ref(), "chain").await.unwrap().unwrap();
    assert!(!recovered.is_incomplete());
    assert!(recovered.messages.iter().all(|m| m.text() != "b answered"));
    assert_eq!(
        recovered.messages.last().map(|m| m.text()),
        Some("root got [a got [b answered]]")
    );
}

#[tokio::test]
async fn test_depth_limit_ends_child_gracefully() {
    let provider = Arc::new(chain_provider());
    let safety = SafetyConfig {
        max_depth: 1,
        ..SafetyConfig::default()
    };
    let exec = executor(provider.clone(), Arc::new(MemoryStorage::new()), safety);

    let outcome = exec.run("root", "start", "depth").await.unwrap();

    // a 在深度 1 被拦下，不调用模型；root 拿到说明文本后作答
    assert_eq!(provider.call_count(), 2);
    assert!(outcome
        .result
        .contains("Max delegation depth (1) reached. Consider breaking task into smaller parts."));
    assert!(outcome.result.starts_with("root got ["));
}

#[tokio::test]
async fn test_agent_depth_override_applies_to_descendants() {
    let provider = Arc::new(chain_provider());
    let exec = executor(provider.clone(), Arc::new(MemoryStorage::new()), SafetyConfig::default());

    let outcome = exec.run("orchestrator", "start", "override").await.unwrap();

    // leaf 位于深度 2，受 orchestrator 的上限约束，不调用模型
    assert_eq!(provider.call_count(), 4);
    assert_eq!(
        outcome.result,
        format!(
            "orchestrator got [worker got [{}]]",
            "Max delegation depth (2) reached. Consider breaking task into smaller parts."
        )
    );
}

fn looping_provider() -> MockProvider {
    let n = AtomicUsize::new(0);
    MockProvider::new("mock", move |_| {
        let i = n.fetch_add(1, Ordering::SeqCst);
        Completion::tool_calls(
            None,
            vec![ToolCall::new(format!("c{i}"), "echo", json!({"text": "again"}))],
        )
    })
}

#[tokio::test]
async fn test_iteration_ceiling_fails_before_next_model_call() {
    let provider = Arc::new(looping_provider());
    let safety = SafetyConfig {
        max_iterations: 3,
        warn_at_iteration: 2,
        ..SafetyConfig::default()
    };
    let exec = executor(provider.clone(), Arc::new(MemoryStorage::new()), safety);

    let err = exec.run("helper", "loop", "loop").await.unwrap_err();
    assert_eq!(err.safety_limit_kind(), Some(SafetyLimitKind::Iterations));
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test]
async fn test_finishing_on_the_last_allowed_iteration_succeeds() {
    let echo = |id: &str| ToolCall::new(id, "echo", json!({"text": "x"}));
    let provider = Arc::new(MockProvider::scripted(
        "mock",
        vec![
            Completion::tool_calls(None, vec![echo("c1")]),
            Completion::tool_calls(None, vec![echo("c2")]),
            Completion::text("finished"),
        ],
    ));
    let safety = SafetyConfig {
        max_iterations: 3,
        ..SafetyConfig::default()
    };
    let exec = executor(provider, Arc::new(MemoryStorage::new()), safety);

    let outcome = exec.run("helper", "go", "edge").await.unwrap();
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.result, "finished");
}

#[tokio::test]
async fn test_recovered_history_matches_live_history() {
    let provider = Arc::new(MockProvider::scripted(
        "mock",
        vec![
            Completion::tool_calls(
                Some("checking".into()),
                vec![
                    ToolCall::new("c1", "echo", json!({"text": "one"})),
                    ToolCall::new("c2", "echo", json!({"text": "two"})),
                ],
            ),
            Completion::text("all good"),
        ],
    ));
    let storage = Arc::new(MemoryStorage::new());
    let exec = executor(provider, storage.clone(), SafetyConfig::default());

    let outcome = exec.run("helper", "check", "rt").await.unwrap();
    let recovered = recover_session(storage.as_ref(), "rt").await.unwrap().unwrap();

    // 系统提示词不写入事件日志
    assert_eq!(outcome.messages[0].role, Role::System);
    let live: Vec<(Role, String, usize)> = outcome.messages[1..]
        .iter()
        .map(|m| (m.role, m.text().to_string(), m.tool_calls.len()))
        .collect();
    let rebuilt: Vec<(Role, String, usize)> = recovered
        .messages
        .iter()
        .map(|m| (m.role, m.text().to_string(), m.tool_calls.len()))
        .collect();
    assert_eq!(live, rebuilt);
    assert!(!recovered.is_incomplete());
}

#[tokio::test]
async fn test_call_ids_reused_across_turns_survive_recovery() {
    let echo = |text: &str| ToolCall::new("call_0", "echo", json!({ "text": text }));
    let provider = Arc::new(MockProvider::scripted(
        "mock",
        vec![
            Completion::tool_calls(None, vec![echo("first")]),
            Completion::tool_calls(None, vec![echo("second")]),
            Completion::text("done"),
        ],
    ));
    let storage = Arc::new(MemoryStorage::new());
    let exec = executor(provider, storage.clone(), SafetyConfig::default());

    let outcome = exec.run("helper", "twice", "reuse").await.unwrap();
    let recovered = recover_session(storage.as_ref(), "reuse").await.unwrap().unwrap();

    let live: Vec<(Role, String)> = outcome.messages[1..]
        .iter()
        .map(|m| (m.role, m.text().to_string()))
        .collect();
    let rebuilt: Vec<(Role, String)> = recovered
        .messages
        .iter()
        .map(|m| (m.role, m.text().to_string()))
        .collect();
    assert_eq!(live, rebuilt);
    assert_eq!(
        rebuilt.iter().filter(|(role, _)| *role == Role::Tool).count(),
        2
    );
    assert!(!recovered.is_incomplete());
}

#[tokio::test]
async fn test_resume_completes_interrupted_tool_calls() {
    let storage = Arc::new(MemoryStorage::new());
    for payload in [
        EventPayload::User {
            content: "say ping".into(),
        },
        EventPayload::Assistant {
            content: None,
            tool_calls: vec![ToolCall::new("c1", "echo", json!({"text": "ping"}))],
        },
    ] {
        storage.append("crashed", &SessionEvent::new(payload)).await.unwrap();
    }

    let before = recover_session(storage.as_ref(), "crashed").await.unwrap().unwrap();
    assert!(before.is_incomplete());
    assert_eq!(before.pending[0].id, "c1");

    let provider = Arc::new(MockProvider::echo("mock"));
    let exec = executor(provider.clone(), storage.clone(), SafetyConfig::default());
    let outcome = exec.resume("crashed", "helper", None).await.unwrap();

    assert_eq!(outcome.result, "Echo from Mock: ping");
    assert_eq!(provider.call_count(), 1);

    let after = recover_session(storage.as_ref(), "crashed").await.unwrap().unwrap();
    assert!(!after.is_incomplete());
    let tool: Vec<&Message> = after.messages.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(tool.len(), 1);
    assert_eq!(tool[0].tool_call_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_resume_of_complete_session_does_not_call_model() {
    let storage = Arc::new(MemoryStorage::new());
    let provider = Arc::new(MockProvider::echo("mock"));
    let exec = executor(provider.clone(), storage.clone(), SafetyConfig::default());

    exec.run("helper", "hello", "done").await.unwrap();
    let outcome = exec.resume("done", "helper", None).await.unwrap();

    assert_eq!(outcome.iterations, 0);
    assert_eq!(outcome.result, "Echo from Mock: hello");
    assert_eq!(provider.call_count(), 1);

    let follow_up = exec.resume("done", "helper", Some("again")).await.unwrap();
    assert_eq!(follow_up.result, "Echo from Mock: again");
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn test_file_storage_survives_truncated_tail() {
    let dir = tempfile::TempDir::new().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()));
    let provider = Arc::new(MockProvider::echo("mock"));
    let exec = executor(provider, storage.clone(), SafetyConfig::default());
    exec.run("helper", "persist me", "disk").await.unwrap();

    // 模拟写到一半崩溃
    let path = dir.path().join("disk.jsonl");
    let mut raw = std::fs::read_to_string(&path).unwrap();
    raw.push_str("{\"type\":\"assistant\",\"timest");
    std::fs::write(&path, raw).unwrap();

    let recovered = recover_session(storage.as_ref(), "disk").await.unwrap().unwrap();
    let texts: Vec<&str> = recovered.messages.iter().map(|m| m.text()).collect();
    assert_eq!(texts, vec!["persist me", "Echo from Mock: persist me"]);
}

#[tokio::test]
async fn test_resume_after_truncated_tail_keeps_new_events() {
    let dir = tempfile::TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::echo("mock"));
    {
        let storage = Arc::new(FileStorage::new(dir.path()));
        let exec = executor(provider.clone(), storage, SafetyConfig::default());
        exec.run("helper", "persist me", "tail").await.unwrap();
    }

    // 上一个进程写到一半崩溃，末行没有换行
    let path = dir.path().join("tail.jsonl");
    let mut raw = std::fs::read_to_string(&path).unwrap();
    raw.push_str("{\"type\":\"user\",\"data\":{\"cont");
    std::fs::write(&path, raw).unwrap();

    // 新进程：新的存储实例接着追加
    let storage = Arc::new(FileStorage::new(dir.path()));
    let exec = executor(provider, storage.clone(), SafetyConfig::default());
    let outcome = exec.resume("tail", "helper", Some("and more")).await.unwrap();
    assert_eq!(outcome.result, "Echo from Mock: and more");

    let recovered = recover_session(storage.as_ref(), "tail").await.unwrap().unwrap();
    let texts: Vec<&str> = recovered.messages.iter().map(|m| m.text()).collect();
    assert_eq!(
        texts,
        vec![
            "persist me",
            "Echo from Mock: persist me",
            "and more",
            "Echo from Mock: and more"
        ]
    );
}

#[tokio::test]
async fn test_todos_are_recovered_from_the_log() {
    let storage = Arc::new(MemoryStorage::new());
    let provider = Arc::new(MockProvider::scripted(
        "mock",
        vec![
            Completion::tool_calls(
                None,
                vec![ToolCall::new(
                    "t1",
                    "todo_write",
                    json!({"todos": [
                        {"content": "Write parser", "activeForm": "Writing parser", "status": "in_progress"},
                        {"content": "Add tests", "activeForm": "Adding tests", "status": "pending"}
                    ]}),
                )],
            ),
            Completion::text("planned"),
        ],
    ));
    let exec = executor(provider, storage.clone(), SafetyConfig::default());
    exec.run("helper", "plan", "plan").await.unwrap();

    let recovered = recover_session(storage.as_ref(), "plan").await.unwrap().unwrap();
    let contents: Vec<&str> = recovered.todos.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["Write parser", "Add tests"]);
}

#[tokio::test]
async fn test_agent_model_override_without_credentials() {
    let exec = executor(
        Arc::new(MockProvider::echo("mock")),
        Arc::new(MemoryStorage::new()),
        SafetyConfig::default(),
    );
    match exec.run("picky", "hi", "picky").await {
        Err(AgentError::ModelUnavailable { agent, model, .. }) => {
            assert_eq!(agent, "picky");
            assert_eq!(model, "gpt-missing");
        }
        other => panic!("expected ModelUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_agent_runs_as_default() {
    let provider = Arc::new(MockProvider::new("mock", |req| {
        let system = req.messages.first().map(|m| m.text()).unwrap_or("");
        Completion::text(if system.contains("You were invoked as 'ghost'") {
            "fallback"
        } else {
            "wrong"
        })
    }));
    let exec = executor(provider, Arc::new(MemoryStorage::new()), SafetyConfig::default());
    let outcome = exec.run("ghost", "boo", "ghost").await.unwrap();
    assert_eq!(outcome.result, "fallback");
}
