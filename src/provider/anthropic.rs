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
use crate::types::{ChatReply, ChatRequest, FinishReason, Role};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages 适配器
pub struct AnthropicProvider {
    transport: DynHttpTransport,
    config: ProviderConfig,
    timeout: Duration,
}

impl AnthropicProvider {
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
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            ("x-api-key".to_string(), self.config.api_key.clone()),
            (
                "anthropic-version".to_string(),
                ANTHROPIC_VERSION.to_string(),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ])
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        let body = build_anthropic_body(request, &self.config.model)?;
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(),
            self.timeout,
            &body,
        )
        .await?;
        self.handle_response(response)
    }

    fn handle_response(&self, response: HttpResponse) -> Result<ChatReply, ChatError> {
        let HttpResponse {
            status,
            headers,
            body,
        } = response;
        let text = String::from_utf8(body).map_err(|err| ChatError::transport(err.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(parse_anthropic_error(
                status,
                &text,
                retry_after_from_headers(&headers),
            ));
        }
        map_anthropic_response(&text)
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        with_rate_limit_retry(self.name(), || self.send_once(request)).await
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }
}

/// 构建 Messages 请求体
///
/// system 轮折叠为顶层 system 字段 其余进入 messages
/// Anthropic 要求显式 max_tokens
pub(crate) fn build_anthropic_body(
    request: &ChatRequest,
    model: &str,
) -> Result<Value, ChatError> {
    let mut system_texts = Vec::new();
    let mut messages = Vec::new();
    for turn in &request.turns {
        match turn.role {
            Role::System => system_texts.push(turn.text.clone()),
            Role::User | Role::Assistant => {
                messages.push(json!({
                    "role": turn.role.as_str(),
                    "content": turn.text
                }));
            }
        }
    }

    if messages.is_empty() {
        return Err(ChatError::Validation {
            message: "Anthropic Messages request requires at least one user/assistant turn"
                .to_string(),
        });
    }

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert("max_tokens".to_string(), Value::from(request.max_tokens));
    body.insert("temperature".to_string(), Value::from(request.temperature));
    if !system_texts.is_empty() {
        body.insert(
            "system".to_string(),
            Value::String(system_texts.join("\n\n")),
        );
    }
    Ok(Value::Object(body))
}

/// 将 2xx 响应体解析为归一化回复 文本块按顺序拼接
pub(crate) fn map_anthropic_response(text: &str) -> Result<ChatReply, ChatError> {
    let parsed: AnthropicResponse =
        serde_json::from_str(text).map_err(|err| ChatError::Provider {
            provider: "anthropic",
            message: format!("failed to parse Anthropic response: {err}"),
        })?;

    let reply_text: String = parsed
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    if reply_text.is_empty() {
        return Err(ChatError::provider(
            "anthropic",
            "response carried no text content blocks",
        ));
    }

    Ok(ChatReply {
        text: reply_text,
        finish_reason: match parsed.stop_reason.as_deref() {
            Some("max_tokens") => FinishReason::Truncated,
            _ => FinishReason::Complete,
        },
        raw_error: None,
        provider: Some("anthropic".to_string()),
    })
}

/// 按状态码与错误类型归类 Anthropic 错误响应
pub(crate) fn parse_anthropic_error(
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
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error);
    let kind = parsed.as_ref().and_then(|error| error.kind.clone());
    let message = parsed
        .and_then(|error| error.message)
        .unwrap_or_else(|| format!("status {status}: {body}"));

    match (status, kind.as_deref()) {
        (401 | 403, _) | (_, Some("authentication_error" | "permission_error")) => {
            ChatError::Auth { message }
        }
        (429, _) | (_, Some("rate_limit_error")) => ChatError::RateLimit {
            message,
            retry_after,
        },
        (400, _) | (_, Some("invalid_request_error")) => ChatError::Validation { message },
        _ => ChatError::Provider {
            provider: "anthropic",
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatTurn;

    fn sample_request() -> ChatRequest {
        ChatRequest {
            turns: vec![
                ChatTurn::new(Role::System, "You are helpful."),
                ChatTurn::new(Role::User, "hello"),
                ChatTurn::new(Role::Assistant, "hi"),
                ChatTurn::new(Role::User, "and now?"),
            ],
            max_tokens: 512,
            temperature: 0.2,
        }
    }

    #[test]
    fn body_folds_system_into_top_level_field() {
        let body = build_anthropic_body(&sample_request(), "claude-3-sonnet-20240229")
            .expect("body should build");

        assert_eq!(body["system"], json!("You are helpful."));
        assert_eq!(body["max_tokens"], json!(512));
        let messages = body["messages"].as_array().expect("messages array");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], json!("user"));
        assert_eq!(messages[1]["role"], json!("assistant"));
    }

    #[test]
    fn system_only_history_is_rejected() {
        let request = ChatRequest {
            turns: vec![ChatTurn::new(Role::System, "instructions only")],
            max_tokens: 10,
            temperature: 0.0,
        };
        assert!(matches!(
            build_anthropic_body(&request, "claude-3-sonnet-20240229"),
            Err(ChatError::Validation { .. })
        ));
    }

    #[test]
    fn map_response_concatenates_text_blocks() {
        let text = r#"{
            "content": [
                { "type": "text", "text": "Hello" },
                { "type": "text", "text": " there" }
            ],
            "stop_reason": "end_turn"
        }"#;
        let reply = map_anthropic_response(text).expect("should map");
        assert_eq!(reply.text, "Hello there");
        assert_eq!(reply.finish_reason, FinishReason::Complete);
        assert_eq!(reply.provider.as_deref(), Some("anthropic"));
    }

    #[test]
    fn max_tokens_stop_maps_to_truncated() {
        let text = r#"{
            "content": [ { "type": "text", "text": "partial" } ],
            "stop_reason": "max_tokens"
        }"#;
        let reply = map_anthropic_response(text).expect("should map");
        assert_eq!(reply.finish_reason, FinishReason::Truncated);
    }

    #[test]
    fn empty_content_is_transient_provider_error() {
        let err = map_anthropic_response(r#"{"content": []}"#).expect_err("should fail");
        assert!(err.is_transient());
    }

    #[test]
    fn error_classification_uses_type_and_status() {
        let auth = r#"{"type": "error", "error": {"type": "authentication_error", "message": "invalid x-api-key"}}"#;
        assert!(matches!(
            parse_anthropic_error(401, auth, None),
            ChatError::Auth { .. }
        ));

        let rate = r#"{"type": "error", "error": {"type": "rate_limit_error", "message": "slow down"}}"#;
        assert!(matches!(
            parse_anthropic_error(429, rate, Some(Duration::from_secs(2))),
            ChatError::RateLimit {
                retry_after: Some(_),
                ..
            }
        ));

        let invalid = r#"{"type": "error", "error": {"type": "invalid_request_error", "message": "max_tokens required"}}"#;
        assert!(matches!(
            parse_anthropic_error(400, invalid, None),
            ChatError::Validation { .. }
        ));

        let overloaded = r#"{"type": "error", "error": {"type": "overloaded_error", "message": "overloaded"}}"#;
        assert!(matches!(
            parse_anthropic_error(529, overloaded, None),
            ChatError::Provider { .. }
        ));
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicResponse {
    #[serde(default)]
    pub(crate) content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) text: Option<String>,
}
