use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// 供应商类型 固定优先级顺序见 [`ProviderKind::PRIORITY`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Groq,
    OpenAi,
    Gemini,
    Anthropic,
}

impl ProviderKind {
    /// 默认回退顺序 Groq -> OpenAI -> Gemini -> Claude
    pub const PRIORITY: [ProviderKind; 4] = [
        ProviderKind::Groq,
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
        ProviderKind::Anthropic,
    ];

    /// `PREFERRED_PROVIDER` 使用的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "groq",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "google",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ChatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(ProviderKind::Groq),
            "openai" => Ok(ProviderKind::OpenAi),
            "google" | "gemini" => Ok(ProviderKind::Gemini),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            other => Err(ChatError::InvalidConfig {
                field: "PREFERRED_PROVIDER".to_string(),
                reason: format!(
                    "unknown provider {other:?}, expected groq | openai | google | anthropic"
                ),
            }),
        }
    }
}

const DEFAULT_MAX_TOKENS: u32 = 2000;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// 每个供应商的只读运行配置 加载后不再修改
///
/// 当 `api_key` 非空时该供应商视为可用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// 一次性收集的全部配置 避免散落在各处的环境变量读取
///
/// 优先级 显式 builder 覆盖 > `.env` 文件 > 进程环境变量
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub groq_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub preferred: Option<ProviderKind>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub model_overrides: ModelOverrides,
    pub base_url_overrides: ModelOverrides,
}

/// 按供应商的可选字符串覆盖 用于模型名和 base_url
#[derive(Debug, Clone, Default)]
pub struct ModelOverrides {
    pub groq: Option<String>,
    pub openai: Option<String>,
    pub google: Option<String>,
    pub anthropic: Option<String>,
}

impl ModelOverrides {
    fn get(&self, kind: ProviderKind) -> Option<&String> {
        match kind {
            ProviderKind::Groq => self.groq.as_ref(),
            ProviderKind::OpenAi => self.openai.as_ref(),
            ProviderKind::Gemini => self.google.as_ref(),
            ProviderKind::Anthropic => self.anthropic.as_ref(),
        }
    }
}

impl Settings {
    /// 加载 `.env` 后读取进程环境 `.env` 中的值覆盖已有环境变量
    ///
    /// `.env` 不存在不算错误 存在但无法解析则报 `InvalidConfig`
    pub fn load() -> Result<Self, ChatError> {
        match dotenvy::dotenv_override() {
            Ok(_) => {}
            Err(err) if err.not_found() => {}
            Err(err) => return Err(dotenv_error(err)),
        }
        Self::from_env()
    }

    /// 从指定路径加载 `.env` 后读取进程环境
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self, ChatError> {
        dotenvy::from_path_override(path).map_err(dotenv_error)?;
        Self::from_env()
    }

    /// 仅从当前进程环境读取
    pub fn from_env() -> Result<Self, ChatError> {
        let max_tokens = match read_env("MAX_TOKENS") {
            Some(raw) => parse_max_tokens(&raw)?,
            None => DEFAULT_MAX_TOKENS,
        };
        let temperature = match read_env("TEMPERATURE") {
            Some(raw) => parse_temperature(&raw)?,
            None => DEFAULT_TEMPERATURE,
        };
        let preferred = match read_env("PREFERRED_PROVIDER") {
            Some(raw) => Some(raw.parse::<ProviderKind>()?),
            None => None,
        };

        Ok(Self {
            groq_api_key: read_env("GROQ_API_KEY"),
            openai_api_key: read_env("OPENAI_API_KEY"),
            google_api_key: read_env("GOOGLE_API_KEY"),
            anthropic_api_key: read_env("ANTHROPIC_API_KEY"),
            preferred,
            max_tokens,
            temperature,
            model_overrides: ModelOverrides {
                groq: read_env("GROQ_MODEL"),
                openai: read_env("OPENAI_MODEL"),
                google: read_env("GOOGLE_MODEL"),
                anthropic: read_env("ANTHROPIC_MODEL"),
            },
            base_url_overrides: ModelOverrides {
                groq: read_env("GROQ_BASE_URL"),
                openai: read_env("OPENAI_BASE_URL"),
                google: read_env("GOOGLE_BASE_URL"),
                anthropic: read_env("ANTHROPIC_BASE_URL"),
            },
        })
    }

    /// 构造使用默认采样参数的空配置 便于测试和显式注入
    pub fn empty() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            ..Self::default()
        }
    }

    /// 显式覆盖某个供应商的 API key 优先级最高
    pub fn with_api_key(mut self, kind: ProviderKind, key: impl Into<String>) -> Self {
        let key = Some(key.into());
        match kind {
            ProviderKind::Groq => self.groq_api_key = key,
            ProviderKind::OpenAi => self.openai_api_key = key,
            ProviderKind::Gemini => self.google_api_key = key,
            ProviderKind::Anthropic => self.anthropic_api_key = key,
        }
        self
    }

    /// 显式指定偏好供应商
    pub fn with_preferred(mut self, kind: ProviderKind) -> Self {
        self.preferred = Some(kind);
        self
    }

    fn api_key(&self, kind: ProviderKind) -> Option<&String> {
        match kind {
            ProviderKind::Groq => self.groq_api_key.as_ref(),
            ProviderKind::OpenAi => self.openai_api_key.as_ref(),
            ProviderKind::Gemini => self.google_api_key.as_ref(),
            ProviderKind::Anthropic => self.anthropic_api_key.as_ref(),
        }
    }
}

fn dotenv_error(err: dotenvy::Error) -> ChatError {
    ChatError::InvalidConfig {
        field: ".env".to_string(),
        reason: err.to_string(),
    }
}

/// 读取环境变量 空白值视为未设置
fn read_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_max_tokens(raw: &str) -> Result<u32, ChatError> {
    let value: u32 = raw.trim().parse().map_err(|_| ChatError::InvalidConfig {
        field: "MAX_TOKENS".to_string(),
        reason: format!("expected a positive integer, got {raw:?}"),
    })?;
    if value == 0 {
        return Err(ChatError::InvalidConfig {
            field: "MAX_TOKENS".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn parse_temperature(raw: &str) -> Result<f32, ChatError> {
    let value: f32 = raw.trim().parse().map_err(|_| ChatError::InvalidConfig {
        field: "TEMPERATURE".to_string(),
        reason: format!("expected a float, got {raw:?}"),
    })?;
    if !(0.0..=2.0).contains(&value) {
        return Err(ChatError::InvalidConfig {
            field: "TEMPERATURE".to_string(),
            reason: format!("{value} is outside the allowed range [0, 2]"),
        });
    }
    Ok(value)
}

fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Groq => "https://api.groq.com",
        ProviderKind::OpenAi => "https://api.openai.com",
        ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
        ProviderKind::Anthropic => "https://api.anthropic.com",
    }
}

fn default_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Groq => "llama-3.1-8b-instant",
        ProviderKind::OpenAi => "gpt-3.5-turbo",
        ProviderKind::Gemini => "gemini-pro",
        ProviderKind::Anthropic => "claude-3-sonnet-20240229",
    }
}

/// 凭证解析器 根据配置决定哪些供应商可用以及尝试顺序
///
/// 只读取 [`Settings`] 不产生任何副作用
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    settings: Settings,
}

impl CredentialResolver {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// 按确定性顺序返回可用供应商
    ///
    /// 固定优先级 Groq -> OpenAI -> Gemini -> Claude 偏好供应商被移到最前
    /// 没有 API key 的条目被过滤掉
    pub fn available_providers(&self) -> Vec<ProviderConfig> {
        let mut order: Vec<ProviderKind> = ProviderKind::PRIORITY.to_vec();
        if let Some(preferred) = self.settings.preferred {
            order.retain(|kind| *kind != preferred);
            order.insert(0, preferred);
        }

        order
            .into_iter()
            .filter_map(|kind| self.config_for(kind))
            .collect()
    }

    /// 可用供应商的名称列表 供 status 一类的上层命令使用
    pub fn available_names(&self) -> Vec<&'static str> {
        self.available_providers()
            .iter()
            .map(|config| config.kind.as_str())
            .collect()
    }

    fn config_for(&self, kind: ProviderKind) -> Option<ProviderConfig> {
        let api_key = self.settings.api_key(kind)?.clone();
        Some(ProviderConfig {
            kind,
            api_key,
            base_url: self
                .settings
                .base_url_overrides
                .get(kind)
                .cloned()
                .unwrap_or_else(|| default_base_url(kind).to_string()),
            model: self
                .settings
                .model_overrides
                .get(kind)
                .cloned()
                .unwrap_or_else(|| default_model(kind).to_string()),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        })
    }
}
