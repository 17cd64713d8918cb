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

/// Google Gemini GenerateContent 适配器
///
/// 与 chat-completions 系接口不同 模型名走 URL 路径
/// `POST /v1beta/models/{model}:generateContent`
pub struct GeminiProvider {
    transport: DynHttpTransport,
    config: ProviderConfig,
    timeout: Duration,
}

impl GeminiProvider {
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
        let model_path = normalize_model(&self.config.model);
        if base.ends_with("/v1beta") {
            format!("{base}/{model_path}:generateContent")
        } else {
            format!("{base}/v1beta/{model_path}:generateContent")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            ("x-goog-api-key".to_string(), self.config.api_key.clone()),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ])
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        let body = build_gemini_body(request)?;
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
            return Err(parse_gemini_error(
                status,
                &text,
                retry_after_from_headers(&headers),
            ));
        }
        map_gemini_response(&text)
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        with_rate_limit_retry(self.name(), || self.send_once(request)).await
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }
}

fn normalize_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// 构建 GenerateContent 请求体
///
/// system 轮折叠为 system_instruction 其余进入 contents
/// assistant 统一映射为 Gemini 的 model 角色
pub(crate) fn build_gemini_body(request: &ChatRequest) -> Result<Value, ChatError> {
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();
    for turn in &request.turns {
        match turn.role {
            Role::System => system_texts.push(turn.text.clone()),
            Role::User | Role::Assistant => {
                let role = if turn.role == Role::Assistant {
                    "model"
                } else {
                    "user"
                };
                contents.push(json!({
                    "role": role,
                    "parts": [ { "text": turn.text } ]
                }));
            }
        }
    }

    if contents.is_empty() {
        return Err(ChatError::Validation {
            message: "Gemini GenerateContent request requires at least one user/assistant turn"
                .to_string(),
        });
    }

    let mut body = Map::new();
    body.insert("contents".to_string(), Value::Array(contents));
    if !system_texts.is_empty() {
        body.insert(
            "system_instruction".to_string(),
            json!({
                "role": "system",
                "parts": [ { "text": system_texts.join("\n\n") } ]
            }),
        );
    }
    body.insert(
        "generationConfig".to_string(),
        json!({
            "maxOutputTokens": request.max_tokens,
            "temperature": request.temperature,
        }),
    );
    Ok(Value::Object(body))
}

/// 将 2xx 响应体解析为归一化回复
pub(crate) fn map_gemini_response(text: &str) -> Result<ChatReply, ChatError> {
    let parsed: GeminiResponse = serde_json::from_str(text).map_err(|err| ChatError::Provider {
        provider: "google",
        message: format!("failed to parse Gemini response: {err}"),
    })?;

    let candidate = parsed
        .candidates
        .first()
        .ok_or_else(|| ChatError::provider("google", "response contained no candidates"))?;
    let reply_text: String = candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if reply_text.is_empty() {
        return Err(ChatError::provider("google", "candidate carried no text parts"));
    }

    Ok(ChatReply {
        text: reply_text,
        finish_reason: match candidate.finish_reason.as_deref() {
            Some("MAX_TOKENS") => FinishReason::Truncated,
            _ => FinishReason::Complete,
        },
        raw_error: None,
        provider: Some("google".to_string()),
    })
}

/// 按状态码归类 Google API 错误响应
pub(crate) fn parse_gemini_error(
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
        status: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .map(|error| {
            let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
            if let Some(code) = error.status {
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
        _ => ChatError::Provider {
            provider: "google",
            message,
        },
    }
}


#[derive(Debug, Deserialize)]
pub(crate) struct GeminiResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiCandidate {
    #[serde(default)]
    pub(crate) content: Option<GeminiContent>,
    #[serde(default, rename = "finishReason")]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiContent {
    #[serde(default)]
    pub(crate) parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiPart {
    #[serde(default)]
    pub(crate) text: Option<String>,
}
