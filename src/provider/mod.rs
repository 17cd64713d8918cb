use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProviderKind;
use crate::error::ChatError;
use crate::types::{ChatReply, ChatRequest};

pub mod anthropic;
pub mod gemini;
pub mod groq;
pub mod openai;
pub(crate) mod retry;

/// 统一的 Provider Trait 所有供应商实现该接口即可接入
///
/// 一次 `send_chat` 对应一条有界超时的 HTTP POST 请求
/// 429 在适配器内部按本地预算重试 其余错误原样上抛由 Dispatcher 分类
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// 提交完整请求并等待归一化响应
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply, ChatError>;

    /// 供应商类型
    fn kind(&self) -> ProviderKind;

    /// 供应商名称 与 `PREFERRED_PROVIDER` 的取值一致
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// 线程安全 Provider
pub type DynProvider = Arc<dyn ChatProvider>;
