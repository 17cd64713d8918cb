use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ChatError;
use crate::http::{DEFAULT_TIMEOUT, DynHttpTransport, post_json_with_headers};
use crate::provider::ChatProvider;
use crate::provider::openai::{
    bearer_headers, build_chat_completions_body, handle_chat_completions_response,
};
use crate::provider::retry::with_rate_limit_retry;
use crate::types::{ChatReply, ChatRequest};

/// Groq 适配器
///
/// Groq 暴露 OpenAI 兼容接口 路径前缀为 `/openai` 其余编解码复用
/// [`super::openai`] 的 chat-completions 实现
pub struct GroqProvider {
    transport: DynHttpTransport,
    config: ProviderConfig,
    timeout: Duration,
}

impl GroqProvider {
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
        if base.ends_with("/openai/v1") {
            format!("{base}/chat/completions")
        } else if base.ends_with("/openai") {
            format!("{base}/v1/chat/completions")
        } else {
            format!("{base}/openai/v1/chat/completions")
        }
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        let body = build_chat_completions_body(request, &self.config.model)?;
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            bearer_headers(&self.config.api_key),
            self.timeout,
            &body,
        )
        .await?;
        handle_chat_completions_response(self.name(), response)
    }
}

#[async_trait]
impl ChatProvider for GroqProvider {
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        with_rate_limit_retry(self.name(), || self.send_once(request)).await
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Groq
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::{HttpRequest, HttpResponse, HttpTransport};

    struct NoopTransport;

    #[async_trait]
    impl HttpTransport for NoopTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, ChatError> {
            unreachable!("endpoint tests never send");
        }
    }

    fn config_with_base(base_url: &str) -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::Groq,
            api_key: "gsk-test".to_string(),
            base_url: base_url.to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            max_tokens: 100,
            temperature: 0.7,
        }
    }

    #[test]
    fn endpoint_appends_openai_compatible_path() {
        let provider = GroqProvider::new(Arc::new(NoopTransport), config_with_base("https://api.groq.com"));
        assert_eq!(
            provider.endpoint(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn endpoint_respects_full_prefix() {
        let provider = GroqProvider::new(
            Arc::new(NoopTransport),
            config_with_base("http://localhost:9999/openai/v1/"),
        );
        assert_eq!(
            provider.endpoint(),
            "http://localhost:9999/openai/v1/chat/completions"
        );
    }

    #[test]
    fn endpoint_completes_partial_prefix() {
        let provider = GroqProvider::new(
            Arc::new(NoopTransport),
            config_with_base("http://localhost:9999/openai"),
        );
        assert_eq!(
            provider.endpoint(),
            "http://localhost:9999/openai/v1/chat/completions"
        );
    }
}
