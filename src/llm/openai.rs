//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）：支持工具调用、采样参数与
//! response_format；每次调用从响应中读取用量（含缓存命中 token）与 finish_reason。
//!
//! 消息、工具声明与 response_format 先写成 OpenAI 线上 JSON 形态，再反序列化为 async_openai 的
//! 请求类型，这样同一份映射对各种消息角色都成立。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, CompletionUsage, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, CreateChatCompletionResponse, FinishReason,
};
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{
    Completion, CompletionRequest, LlmError, Message, ModelProvider, ProviderFactory,
    ResponseFormat, Role, StopReason, ToolCall, UsageMetrics,
};

/// OpenAI 兼容客户端：持有 async_openai Client 与模型名
pub struct OpenAiCompatibleProvider {
    client: Client<OpenAIConfig>,
    model: String,
    context_window: Option<usize>,
    last_usage: Mutex<Option<UsageMetrics>>,
    last_stop: Mutex<Option<StopReason>>,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let config = match base_url {
            Some(url) => OpenAIConfig::new()
                .with_api_base(url.trim_end_matches('/'))
                .with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client: Client::with_config(config).with_http_client(http),
            model: model.to_string(),
            context_window: known_context_window(model),
            last_usage: Mutex::new(None),
            last_stop: Mutex::new(None),
        })
    }

    fn build_request(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        let messages = request
            .messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut built = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()?;
        built.temperature = request.sampling.temperature;
        built.top_p = request.sampling.top_p;

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            built.tools = Some(from_wire(Value::Array(tools), "tools")?);
        }

        if let Some(structured) = request.structured_output {
            let format = match structured.format {
                ResponseFormat::Text => None,
                ResponseFormat::Json => Some(json!({"type": "json_object"})),
                ResponseFormat::JsonSchema => Some(json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": "response",
                        "schema": structured.schema.clone().unwrap_or_else(|| json!({})),
                    }
                })),
            };
            if let Some(format) = format {
                built.response_format = Some(from_wire(format, "response_format")?);
            }
        }
        Ok(built)
    }
}

fn from_wire<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, LlmError> {
    serde_json::from_value(value).map_err(|e| LlmError::InvalidRequest(format!("{what}: {e}")))
}

/// 转为 OpenAI 线上消息；tool 结果与非 assistant 消息的 content 不能为 null
fn to_request_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let content = match (&m.content, m.role) {
        (Some(text), _) => json!(text),
        (None, Role::Assistant) => Value::Null,
        (None, _) => json!(""),
    };
    let mut wire = json!({ "role": role, "content": content });
    if !m.tool_calls.is_empty() {
        let calls: Vec<Value> = m
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments.to_string() }
                })
            })
            .collect();
        wire["tool_calls"] = Value::Array(calls);
    }
    if let Some(id) = &m.tool_call_id {
        wire["tool_call_id"] = json!(id);
    }
    from_wire(wire, "message")
}

/// 常见模型的上下文窗口
fn known_context_window(model: &str) -> Option<usize> {
    let m = model.to_ascii_lowercase();
    if m.starts_with("gpt-4o") || m.starts_with("gpt-4-turbo") || m.starts_with("o1") || m.starts_with("o3") {
        Some(128_000)
    } else if m.starts_with("gpt-4.1") {
        Some(1_000_000)
    } else if m.starts_with("deepseek") {
        Some(64_000)
    } else if m.starts_with("gpt-3.5") {
        Some(16_385)
    } else {
        None
    }
}

fn usage_metrics(usage: &CompletionUsage) -> UsageMetrics {
    let prompt = u64::from(usage.prompt_tokens);
    let completion = u64::from(usage.completion_tokens);
    let cached = usage
        .prompt_tokens_details
        .as_ref()
        .and_then(|d| d.cached_tokens)
        .map(u64::from)
        .unwrap_or(0);
    let total = u64::from(usage.total_tokens);
    UsageMetrics {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: if total > 0 { total } else { prompt + completion },
        cache_hit_tokens: cached,
        cache_miss_tokens: prompt.saturating_sub(cached),
        cost_usd: 0.0,
        model_calls: 1,
    }
}

fn stop_reason(reason: &FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls | FinishReason::FunctionCall => StopReason::ToolUse,
        FinishReason::ContentFilter => StopReason::Other("content_filter".to_string()),
        #[allow(unreachable_patterns)]
        other => StopReason::Other(format!("{other:?}").to_ascii_lowercase()),
    }
}

#[derive(Debug, Deserialize)]
struct FunctionCallWire {
    id: String,
    #[serde(default)]
    function: Option<FunctionWire>,
}

#[derive(Debug, Deserialize)]
struct FunctionWire {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// 只取 function 类型的调用；custom 工具调用没有 function 字段，跳过
fn function_calls<T: serde::Serialize>(calls: &T) -> Result<Vec<ToolCall>, LlmError> {
    let wire: Vec<FunctionCallWire> = serde_json::to_value(calls)
        .and_then(serde_json::from_value)
        .map_err(|e| LlmError::InvalidResponse(format!("tool_calls: {e}")))?;
    Ok(wire
        .into_iter()
        .filter_map(|c| {
            let function = c.function?;
            // 参数不是合法 JSON 时原样保留为字符串，由工具侧报错
            let arguments = serde_json::from_str(&function.arguments)
                .unwrap_or(Value::String(function.arguments));
            Some(ToolCall::new(c.id, function.name, arguments))
        })
        .collect())
}

fn parse_completion(response: CreateChatCompletionResponse) -> Result<Completion, LlmError> {
    let usage = response.usage.as_ref().map(usage_metrics);
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

    let tool_calls = match &choice.message.tool_calls {
        Some(calls) => function_calls(calls)?,
        None => Vec::new(),
    };

    Ok(Completion {
        message: Message::assistant_with_tools(choice.message.content, tool_calls),
        usage,
        stop_reason: choice.finish_reason.as_ref().map(stop_reason),
    })
}

/// 限流单独归类，其余 API 错误保留服务端给出的说明
fn classify_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::ApiError(api) => {
            let rate_limited = api.r#type.as_deref().is_some_and(|t| t.contains("rate_limit"))
                || api.message.to_ascii_lowercase().contains("rate limit");
            if rate_limited {
                LlmError::RateLimited {
                    retry_after_ms: 1000,
                }
            } else {
                LlmError::Api(api.message)
            }
        }
        other => LlmError::OpenAi(other),
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> Option<usize> {
        self.context_window
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
        let built = self.build_request(&request)?;
        let response = self
            .client
            .chat()
            .create(built)
            .await
            .map_err(classify_error)?;
        let completion = parse_completion(response)?;

        if let Some(usage) = &completion.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion usage"
            );
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

/// 工厂：按模型名构造 OpenAI 兼容客户端；API Key 从环境变量读取
pub struct OpenAiCompatibleFactory {
    base_url: Option<String>,
    api_key_env: String,
    default_model: String,
    request_timeout: Duration,
}

impl OpenAiCompatibleFactory {
    pub fn new(
        base_url: Option<String>,
        api_key_env: impl Into<String>,
        default_model: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            base_url,
            api_key_env: api_key_env.into(),
            default_model: default_model.into(),
            request_timeout,
        }
    }
}

impl ProviderFactory for OpenAiCompatibleFactory {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn create(&self, model: &str) -> Result<Arc<dyn ModelProvider>, LlmError> {
        let api_key = std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::MissingCredentials {
                model: model.to_string(),
                env_var: self.api_key_env.clone(),
            })?;
        let provider = OpenAiCompatibleProvider::new(
            self.base_url.as_deref(),
            model,
            api_key,
            self.request_timeout,
        )?;
        Ok(Arc::new(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Sampling, StructuredOutput, ToolSpec};

    fn response(choice: Value, usage: Option<Value>) -> CreateChatCompletionResponse {
        let mut raw = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-4o-mini",
            "choices": [choice],
        });
        if let Some(usage) = usage {
            raw["usage"] = usage;
        }
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_parse_completion_with_tool_calls() {
        let completion = parse_completion(response(
            json!({
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "echo", "arguments": "{\"text\":\"hi\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }),
            Some(json!({
                "prompt_tokens": 100,
                "completion_tokens": 10,
                "total_tokens": 110,
                "prompt_tokens_details": {"cached_tokens": 40}
            })),
        ))
        .unwrap();

        assert_eq!(completion.message.tool_calls.len(), 1);
        assert_eq!(completion.message.tool_calls[0].arguments["text"], "hi");
        assert_eq!(completion.stop_reason, Some(StopReason::ToolUse));
        let usage = completion.usage.unwrap();
        assert_eq!(usage.total_tokens, 110);
        assert_eq!(usage.cache_hit_tokens, 40);
        assert_eq!(usage.cache_miss_tokens, 60);
    }

    #[test]
    fn test_invalid_arguments_kept_as_string() {
        let completion = parse_completion(response(
            json!({
                "index": 0,
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "c", "type": "function",
                        "function": {"name": "echo", "arguments": "{not json"}
                    }]
                },
                "finish_reason": "tool_calls"
            }),
            None,
        ))
        .unwrap();
        assert_eq!(completion.message.tool_calls[0].arguments, Value::String("{not json".into()));
        assert!(completion.usage.is_none());
    }

    #[test]
    fn test_plain_answer_stops_at_end_turn() {
        let completion = parse_completion(response(
            json!({
                "index": 0,
                "message": {"role": "assistant", "content": "done"},
                "finish_reason": "stop"
            }),
            None,
        ))
        .unwrap();
        assert_eq!(completion.message.text(), "done");
        assert_eq!(completion.stop_reason, Some(StopReason::EndTurn));
    }

    #[test]
    fn test_build_request_includes_tools_and_format() {
        let provider =
            OpenAiCompatibleProvider::new(None, "gpt-4o-mini", "sk-test", Duration::from_secs(5))
                .unwrap();
        let messages = vec![
            Message::user("hi"),
            Message::assistant_with_tools(None, vec![ToolCall::new("c1", "echo", json!({"text": "x"}))]),
            Message::tool("c1", "x"),
        ];
        let tools = vec![ToolSpec {
            name: "echo".into(),
            description: "echo".into(),
            parameters: json!({"type": "object"}),
        }];
        let structured = StructuredOutput {
            format: ResponseFormat::Json,
            schema: None,
        };
        let built = provider
            .build_request(&CompletionRequest {
                messages: &messages,
                tools: &tools,
                structured_output: Some(&structured),
                sampling: Sampling {
                    temperature: Some(0.5),
                    top_p: None,
                },
            })
            .unwrap();
        let body = serde_json::to_value(&built).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["tools"][0]["function"]["name"], "echo");
        assert_eq!(body["messages"][1]["tool_calls"][0]["function"]["arguments"], "{\"text\":\"x\"}");
        assert_eq!(body["messages"][2]["tool_call_id"], "c1");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["temperature"], 0.5);
        assert!(body.get("top_p").map_or(true, Value::is_null));
        assert_eq!(provider.context_window(), Some(128_000));
    }

    #[test]
    fn test_json_schema_format_carries_schema() {
        let provider =
            OpenAiCompatibleProvider::new(None, "gpt-4o", "sk-test", Duration::from_secs(5)).unwrap();
        let messages = vec![Message::user("hi")];
        let structured = StructuredOutput {
            format: ResponseFormat::JsonSchema,
            schema: Some(json!({"type": "object", "properties": {"ok": {"type": "boolean"}}})),
        };
        let built = provider
            .build_request(&CompletionRequest {
                messages: &messages,
                tools: &[],
                structured_output: Some(&structured),
                sampling: Sampling::default(),
            })
            .unwrap();
        let body = serde_json::to_value(&built).unwrap();

        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "response");
        assert_eq!(
            body["response_format"]["json_schema"]["schema"]["properties"]["ok"]["type"],
            "boolean"
        );
        assert!(body.get("tools").map_or(true, Value::is_null));
    }

    #[test]
    fn test_factory_requires_api_key() {
        let factory = OpenAiCompatibleFactory::new(
            None,
            "HIVE_TEST_KEY_THAT_IS_NEVER_SET",
            "gpt-4o-mini",
            Duration::from_secs(5),
        );
        assert!(matches!(
            factory.create("gpt-4o-mini"),
            Err(LlmError::MissingCredentials { .. })
        ));
    }
}
