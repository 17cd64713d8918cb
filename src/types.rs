//! Shared data structures modeling normalized chat exchanges.
//!
//! These types normalize provider-specific payloads so the dispatcher and the
//! REPL layer above it can stay agnostic of individual API differences.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Role of a single conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Wire-format string used by the OpenAI-style message arrays.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One message in a conversation, immutable once created.
///
/// Turns are owned exclusively by [`crate::session::Session`]; they are
/// appended and never edited in place, so the ordered history can be replayed
/// or exported at any point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who authored the turn.
    pub role: Role,
    /// Plain UTF-8 text of the turn.
    pub text: String,
    /// Wall-clock creation time.
    pub timestamp: SystemTime,
}

impl ChatTurn {
    /// Creates a turn stamped with the current time.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: SystemTime::now(),
        }
    }
}

/// Vendor-agnostic chat request passed into every provider adapter.
///
/// The turn history carries the full conversational context; adapters reshape
/// it into their vendor's message-array or prompt format.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Ordered conversation history, oldest first.
    pub turns: Vec<ChatTurn>,
    /// Maximum number of output tokens requested from the provider.
    pub max_tokens: u32,
    /// Sampling temperature within `0.0..=2.0`.
    pub temperature: f32,
}

/// Why a normalized reply stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The provider produced a full answer.
    Complete,
    /// The provider hit its output-token limit.
    Truncated,
    /// The exchange failed; see [`ChatReply::raw_error`].
    Error,
}

/// Normalized reply returned by an adapter or by the dispatcher.
///
/// # Examples
///
/// ```
/// use kaiwa::types::{ChatReply, FinishReason};
///
/// let reply = ChatReply::failure("no provider available");
/// assert_eq!(reply.finish_reason, FinishReason::Error);
/// assert!(reply.text.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    /// Assistant text, empty when the exchange failed.
    pub text: String,
    /// Normalized completion status.
    pub finish_reason: FinishReason,
    /// Vendor error message, present only for `FinishReason::Error`.
    pub raw_error: Option<String>,
    /// Name of the provider that produced the reply, when known.
    pub provider: Option<String>,
}

impl ChatReply {
    /// Builds an error reply carrying the given message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            finish_reason: FinishReason::Error,
            raw_error: Some(message.into()),
            provider: None,
        }
    }

    /// Returns `true` for `Complete` and `Truncated` replies.
    pub fn is_success(&self) -> bool {
        matches!(
            self.finish_reason,
            FinishReason::Complete | FinishReason::Truncated
        )
    }
}
