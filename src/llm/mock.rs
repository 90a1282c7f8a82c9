//! Mock 模型提供方（用于测试，无需 API）
//!
//! MockProvider 由一个 responder 闭包决定每次回复，也可按脚本依次返回预设 Completion；
//! StaticProviderFactory 把模型名映射到预先构造好的提供方。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::llm::{
    Completion, CompletionRequest, LlmError, ModelProvider, ProviderFactory, StopReason,
    UsageMetrics,
};

type Responder = dyn Fn(&CompletionRequest<'_>) -> Completion + Send + Sync;

/// Mock 提供方：每次调用交给 responder 生成回复，并记录调用次数
pub struct MockProvider {
    name: String,
    responder: Box<Responder>,
    usage_per_call: Option<UsageMetrics>,
    context_window: Option<usize>,
    calls: AtomicUsize,
    last_usage: Mutex<Option<UsageMetrics>>,
    last_stop: Mutex<Option<StopReason>>,
}

impl MockProvider {
    pub fn new<F>(name: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&CompletionRequest<'_>) -> Completion + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            responder: Box::new(responder),
            usage_per_call: None,
            context_window: None,
            calls: AtomicUsize::new(0),
            last_usage: Mutex::new(None),
            last_stop: Mutex::new(None),
        }
    }

    /// 按顺序返回脚本中的回复；脚本耗尽后回复 "done"
    pub fn scripted(name: impl Into<String>, script: Vec<Completion>) -> Self {
        let queue = Mutex::new(VecDeque::from(script));
        Self::new(name, move |_| {
            queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or_else(|| Completion::text("done"))
        })
    }

    /// 回显最后一条 user / tool 消息
    pub fn echo(name: impl Into<String>) -> Self {
        Self::new(name, |req| {
            let last = req
                .messages
                .iter()
                .rev()
                .find(|m| matches!(m.role, crate::llm::Role::User | crate::llm::Role::Tool))
                .map(|m| m.text().to_string())
                .unwrap_or_else(|| "(no input)".to_string());
            Completion::text(format!("Echo from Mock: {last}"))
        })
    }

    /// 每次调用都附带固定用量（Completion 未自带用量时生效）
    pub fn with_usage_per_call(mut self, usage: UsageMetrics) -> Self {
        self.usage_per_call = Some(usage);
        self
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// 已发生的 complete 调用次数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn context_window(&self) -> Option<usize> {
        self.context_window
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut completion = (self.responder)(&request);
        if completion.usage.is_none() {
            completion.usage = self.usage_per_call;
        }
        if let Ok(mut last) = self.last_usage.lock() {
            *last = completion.usage;
        }
        if let Ok(mut last) = self.last_stop.lock() {
            *last = completion.stop_reason.clone();
        }
        Ok(completion)
    }

    fn last_usage_metrics(&self) -> Option<UsageMetrics> {
        self.last_usage.lock().ok().and_then(|u| *u)
    }

    fn last_stop_reason(&self) -> Option<StopReason> {
        self.last_stop.lock().ok().and_then(|s| s.clone())
    }
}

/// 静态工厂：模型名 -> 已构造的提供方
pub struct StaticProviderFactory {
    default_model: String,
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl StaticProviderFactory {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            providers: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, model: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        self.providers.insert(model.into(), provider);
        self
    }

    /// 单一提供方同时作为默认模型
    pub fn single(provider: Arc<dyn ModelProvider>) -> Self {
        let name = provider.model_name().to_string();
        Self::new(name.clone()).with_provider(name, provider)
    }
}

impl ProviderFactory for StaticProviderFactory {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn create(&self, model: &str) -> Result<Arc<dyn ModelProvider>, LlmError> {
        self.providers
            .get(model)
            .cloned()
            .ok_or_else(|| LlmError::UnsupportedModel(model.to_string()))
    }
}
