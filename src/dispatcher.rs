use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::{CredentialResolver, ProviderKind, Settings};
use crate::error::ChatError;
use crate::http::DynHttpTransport;
use crate::provider::DynProvider;
use crate::provider::anthropic::AnthropicProvider;
use crate::provider::gemini::GeminiProvider;
use crate::provider::groq::GroqProvider;
use crate::provider::openai::OpenAiProvider;
use crate::session::Session;
use crate::types::{ChatReply, ChatRequest};

const NO_PROVIDER_AVAILABLE: &str = "no provider available";

/// 调度器 持有会话与按优先级排序的供应商列表
///
/// 一次 `send` 内请求串行发出 瞬态失败换下一家 成功即停
/// 同一轮用户输入绝不会向多家供应商重复计费成功调用
pub struct Dispatcher {
    providers: Vec<DynProvider>,
    session: Session,
    max_tokens: u32,
    temperature: f32,
}

impl Dispatcher {
    /// 从配置构建调度器 仅注册凭证可用的供应商
    pub fn from_settings(settings: &Settings, transport: DynHttpTransport) -> Self {
        let resolver = CredentialResolver::new(settings.clone());
        let providers = resolver
            .available_providers()
            .into_iter()
            .map(|config| -> DynProvider {
                match config.kind {
                    ProviderKind::Groq => Arc::new(GroqProvider::new(transport.clone(), config)),
                    ProviderKind::OpenAi => {
                        Arc::new(OpenAiProvider::new(transport.clone(), config))
                    }
                    ProviderKind::Gemini => {
                        Arc::new(GeminiProvider::new(transport.clone(), config))
                    }
                    ProviderKind::Anthropic => {
                        Arc::new(AnthropicProvider::new(transport.clone(), config))
                    }
                }
            })
            .collect();

        Self {
            providers,
            session: Session::new(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    /// 直接注入供应商列表 按给定顺序作为回退顺序
    pub fn with_providers(providers: Vec<DynProvider>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            providers,
            session: Session::new(),
            max_tokens,
            temperature,
        }
    }

    /// 发送一轮用户输入并返回归一化回复
    ///
    /// 状态机 Idle -> Requesting(provider_i) -> {Success | Transient -> 下一家 | Exhausted}
    /// 失败的交换不会留下悬空的用户轮 会补一条记录失败的助手轮
    pub async fn send(&mut self, user_text: impl Into<String>) -> ChatReply {
        self.session.push_user(user_text);

        if self.providers.is_empty() {
            error!("chat request dropped: {NO_PROVIDER_AVAILABLE}");
            return self.fail_exchange(NO_PROVIDER_AVAILABLE.to_string());
        }

        let request = ChatRequest {
            turns: self.session.turns().to_vec(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        for provider in self.failover_order() {
            debug!(provider = provider.name(), "dispatching chat request");
            match provider.send_chat(&request).await {
                Ok(reply) => {
                    self.session.push_assistant(reply.text.clone());
                    return reply;
                }
                Err(err) if err.is_transient() => {
                    warn!(provider = provider.name(), error = %err, "provider failed, trying next");
                }
                Err(err) => {
                    error!(provider = provider.name(), error = %err, "permanent failure, aborting exchange");
                    return self.fail_exchange(err.to_string());
                }
            }
        }

        error!("all configured providers exhausted");
        self.fail_exchange(NO_PROVIDER_AVAILABLE.to_string())
    }

    /// 切换当前供应商 不清空历史 幂等
    pub fn select_provider(&mut self, name: &str) -> Result<(), ChatError> {
        let kind: ProviderKind = name.parse().map_err(|_| ChatError::ProviderUnavailable {
            name: name.to_string(),
        })?;
        if !self.providers.iter().any(|provider| provider.kind() == kind) {
            return Err(ChatError::ProviderUnavailable {
                name: name.to_string(),
            });
        }
        self.session.select(kind);
        Ok(())
    }

    /// 可用供应商名称 按默认回退顺序
    pub fn available(&self) -> Vec<&'static str> {
        self.providers.iter().map(|provider| provider.name()).collect()
    }

    /// 只读访问会话历史
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// 回退顺序 选中的供应商轮转到最前 其余保持注册顺序
    fn failover_order(&self) -> Vec<DynProvider> {
        let mut order: Vec<DynProvider> = self.providers.clone();
        if let Some(selected) = self.session.selected() {
            if let Some(index) = order.iter().position(|provider| provider.kind() == selected) {
                order.rotate_left(index);
            }
        }
        order
    }

    fn fail_exchange(&mut self, message: String) -> ChatReply {
        // keeps the history replayable: no user turn is ever left unanswered
        self.session.push_assistant(format!("(exchange failed: {message})"));
        ChatReply::failure(message)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::provider::ChatProvider;
    use crate::types::{FinishReason, Role};

    /// 脚本化的测试 Provider 按顺序弹出预置结果
    struct ScriptedProvider {
        kind: ProviderKind,
        script: Mutex<Vec<Result<ChatReply, ChatError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(kind: ProviderKind, script: Vec<Result<ChatReply, ChatError>>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn ok_reply(text: &str, kind: ProviderKind) -> Result<ChatReply, ChatError> {
            Ok(ChatReply {
                text: text.to_string(),
                finish_reason: FinishReason::Complete,
                raw_error: None,
                provider: Some(kind.as_str().to_string()),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn send_chat(&self, _request: &ChatRequest) -> Result<ChatReply, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().expect("script lock");
            assert!(!script.is_empty(), "provider called more often than scripted");
            script.remove(0)
        }

        fn kind(&self) -> ProviderKind {
            self.kind
        }
    }

    fn dispatcher_with(providers: Vec<DynProvider>) -> Dispatcher {
        Dispatcher::with_providers(providers, 2000, 0.7)
    }

    #[tokio::test]
    async fn transient_failure_fails_over_to_next_provider() {
        let groq = ScriptedProvider::new(
            ProviderKind::Groq,
            vec![Err(ChatError::provider("groq", "status 500"))],
        );
        let openai = ScriptedProvider::new(
            ProviderKind::OpenAi,
            vec![ScriptedProvider::ok_reply("hello from openai", ProviderKind::OpenAi)],
        );
        let mut dispatcher =
            dispatcher_with(vec![groq.clone() as DynProvider, openai.clone() as DynProvider]);

        let reply = dispatcher.send("hello").await;

        assert!(reply.is_success());
        assert_eq!(reply.provider.as_deref(), Some("openai"));
        assert_eq!(groq.calls(), 1);
        assert_eq!(openai.calls(), 1);

        // 恰好追加一条 user 一条 assistant
        let turns = dispatcher.session().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].text, "hello from openai");
    }

    #[tokio::test]
    async fn permanent_failure_stops_without_failover() {
        let groq = ScriptedProvider::new(
            ProviderKind::Groq,
            vec![Err(ChatError::Auth {
                message: "invalid api key".to_string(),
            })],
        );
        let openai = ScriptedProvider::new(
            ProviderKind::OpenAi,
            vec![ScriptedProvider::ok_reply("unused", ProviderKind::OpenAi)],
        );
        let mut dispatcher =
            dispatcher_with(vec![groq.clone() as DynProvider, openai.clone() as DynProvider]);

        let reply = dispatcher.send("hello").await;

        assert_eq!(reply.finish_reason, FinishReason::Error);
        assert!(
            reply
                .raw_error
                .as_deref()
                .expect("raw error")
                .contains("invalid api key")
        );
        assert_eq!(openai.calls(), 0, "permanent errors must not fail over");
    }

    #[tokio::test]
    async fn exhausting_all_providers_returns_single_error_reply() {
        let groq = ScriptedProvider::new(
            ProviderKind::Groq,
            vec![Err(ChatError::transport("timed out"))],
        );
        let anthropic = ScriptedProvider::new(
            ProviderKind::Anthropic,
            vec![Err(ChatError::provider("anthropic", "status 529"))],
        );
        let mut dispatcher = dispatcher_with(vec![groq as DynProvider, anthropic as DynProvider]);

        let reply = dispatcher.send("hello").await;

        assert_eq!(reply.finish_reason, FinishReason::Error);
        assert_eq!(reply.raw_error.as_deref(), Some("no provider available"));

        // 历史保持一致 一条 user 一条记录失败的 assistant
        let turns = dispatcher.session().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::Assistant);
        assert!(turns[1].text.contains("no provider available"));
    }

    #[tokio::test]
    async fn zero_providers_fails_immediately() {
        let mut dispatcher = dispatcher_with(Vec::new());

        let reply = dispatcher.send("hi").await;

        assert_eq!(reply.finish_reason, FinishReason::Error);
        assert_eq!(reply.raw_error.as_deref(), Some("no provider available"));
        // 用户轮仍然被记录
        assert_eq!(dispatcher.session().turns()[0].role, Role::User);
    }

    #[tokio::test]
    async fn selection_rotates_failover_order() {
        let groq = ScriptedProvider::new(
            ProviderKind::Groq,
            vec![ScriptedProvider::ok_reply("unused", ProviderKind::Groq)],
        );
        let anthropic = ScriptedProvider::new(
            ProviderKind::Anthropic,
            vec![ScriptedProvider::ok_reply("from claude", ProviderKind::Anthropic)],
        );
        let mut dispatcher =
            dispatcher_with(vec![groq.clone() as DynProvider, anthropic.clone() as DynProvider]);

        dispatcher
            .select_provider("anthropic")
            .expect("anthropic is configured");
        let reply = dispatcher.send("hello").await;

        assert_eq!(reply.provider.as_deref(), Some("anthropic"));
        assert_eq!(groq.calls(), 0);
        assert_eq!(anthropic.calls(), 1);
    }

    #[tokio::test]
    async fn selecting_twice_is_idempotent() {
        let groq = ScriptedProvider::new(ProviderKind::Groq, Vec::new());
        let mut dispatcher = dispatcher_with(vec![groq as DynProvider]);

        dispatcher.select_provider("groq").expect("configured");
        dispatcher.select_provider("groq").expect("still configured");

        assert!(dispatcher.session().turns().is_empty());
        assert_eq!(dispatcher.session().selected(), Some(ProviderKind::Groq));
    }

    #[test]
    fn selecting_unconfigured_provider_is_rejected() {
        let groq = ScriptedProvider::new(ProviderKind::Groq, Vec::new());
        let mut dispatcher = dispatcher_with(vec![groq as DynProvider]);

        let err = dispatcher
            .select_provider("openai")
            .expect_err("openai has no credentials");
        assert!(matches!(err, ChatError::ProviderUnavailable { .. }));

        let err = dispatcher
            .select_provider("not-a-vendor")
            .expect_err("unknown name");
        assert!(matches!(err, ChatError::ProviderUnavailable { .. }));
    }

    #[test]
    fn available_lists_registered_names_in_order() {
        let providers: Vec<DynProvider> = vec![
            ScriptedProvider::new(ProviderKind::Groq, Vec::new()) as DynProvider,
            ScriptedProvider::new(ProviderKind::Gemini, Vec::new()) as DynProvider,
        ];
        let dispatcher = dispatcher_with(providers);
        assert_eq!(dispatcher.available(), vec!["groq", "google"]);
    }
}
