use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ChatError;
use crate::http::{DEFAULT_TIMEOUT, DynHttpTransport, HttpResponse, post_json_with_headers};
use crate::provider::ChatProvider;
use crate::provider::retry::{retry_after_from_headers, with_rate_limit_retry};
use crate::types::{ChatReply, ChatRequest, FinishReason};

/// OpenAI Chat Completions 适配器
///
/// Groq 走同一套 chat-completions 编解码 见 [`super::groq`]
pub struct OpenAiProvider {
    transport: DynHttpTransport,
    config: ProviderConfig,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(transport: DynHttpTransport, config: ProviderConfig) -> Self {
        Self {
            transport,
            config,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// 自定义单次调用超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        bearer_headers(&self.config.api_key)
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        let body = build_chat_completions_body(request, &self.config.model)?;
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(),
            self.timeout,
            &body,
        )
        .await?;
        handle_chat_completions_response(self.name(), response)
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        with_rate_limit_retry(self.name(), || self.send_once(request)).await
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
}

/// Bearer 鉴权头 OpenAI 与 Groq 共用
pub(crate) fn bearer_headers(api_key: &str) -> HashMap<String, String> {
    HashMap::from([
        ("Authorization".to_string(), format!("Bearer {api_key}")),
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Accept".to_string(), "application/json".to_string()),
    ])
}

/// 构建 chat-completions 请求体 历史按原始顺序映射为 message 数组
pub(crate) fn build_chat_completions_body(
    request: &ChatRequest,
    model: &str,
) -> Result<Value, ChatError> {
    if request.turns.is_empty() {
        return Err(ChatError::Validation {
            message: "chat request requires at least one turn".to_string(),
        });
    }

    let messages: Vec<Value> = request
        .turns
        .iter()
        .map(|turn| json!({ "role": turn.role.as_str(), "content": turn.text }))
        .collect();

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert("max_tokens".to_string(), Value::from(request.max_tokens));
    body.insert("temperature".to_string(), Value::from(request.temperature));
    Ok(Value::Object(body))
}

/// 状态检查加响应归一化 OpenAI 与 Groq 共用
pub(crate) fn handle_chat_completions_response(
    provider: &'static str,
    response: HttpResponse,
) -> Result<ChatReply, ChatError> {
    let HttpResponse {
        status,
        headers,
        body,
    } = response;
    let text = String::from_utf8(body).map_err(|err| ChatError::transport(err.to_string()))?;
    if !(200..300).contains(&status) {
        return Err(parse_chat_completions_error(
            provider,
            status,
            &text,
            retry_after_from_headers(&headers),
        ));
    }
    map_chat_completions_response(provider, &text)
}

/// 将 2xx 响应体解析为归一化回复 无法解析时报 Provider 错误(视为瞬态)
pub(crate) fn map_chat_completions_response(
    provider: &'static str,
    text: &str,
) -> Result<ChatReply, ChatError> {
    let parsed: ChatCompletionsResponse =
        serde_json::from_str(text).map_err(|err| ChatError::Provider {
            provider,
            message: format!("failed to parse chat completions response: {err}"),
        })?;

    let choice = parsed
        .choices
        .first()
        .ok_or_else(|| ChatError::provider(provider, "response contained no choices"))?;
    let content = choice
        .message
        .as_ref()
        .and_then(|message| message.content.clone())
        .ok_or_else(|| ChatError::provider(provider, "response message had no content"))?;

    Ok(ChatReply {
        text: content,
        finish_reason: match choice.finish_reason.as_deref() {
            Some("length") => FinishReason::Truncated,
            _ => FinishReason::Complete,
        },
        raw_error: None,
        provider: Some(provider.to_string()),
    })
}

/// 按状态码归类 chat-completions 错误响应
pub(crate) fn parse_chat_completions_error(
    provider: &'static str,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> ChatError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }
    #[derive(Deserialize)]
    struct InnerError {
        message: Option<String>,
        code: Option<Value>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .map(|error| {
            let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
            if let Some(code) = error.code {
                message = format!("{message} ({code})");
            }
            message
        })
        .unwrap_or_else(|| format!("status {status}: {body}"));

    match status {
        401 | 403 => ChatError::Auth { message },
        429 => ChatError::RateLimit {
            message,
            retry_after,
        },
        400 => ChatError::Validation { message },
        _ => ChatError::Provider { provider, message },
    }
}


#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionsResponse {
    #[serde(default)]
    pub(crate) choices: Vec<ChatCompletionsChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionsChoice {
    #[serde(default)]
    pub(crate) message: Option<ChatCompletionsMessage>,
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionsMessage {
    #[serde(default)]
    pub(crate) content: Option<String>,
}
