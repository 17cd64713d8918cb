//! 多供应商 LLM 聊天核心库 凭证解析 / 请求归一化 / 顺序故障转移

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod provider;
pub mod session;
pub mod types;

pub use config::{CredentialResolver, ProviderConfig, ProviderKind, Settings};
pub use dispatcher::Dispatcher;
pub use error::ChatError;
pub use provider::ChatProvider;
pub use session::Session;
pub use types::*;
