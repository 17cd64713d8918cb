use std::time::Duration;

use thiserror::Error;

/// Aggregates every failure mode exposed by the chat core.
///
/// The dispatcher inspects [`ChatError::is_transient`] to decide whether a failed
/// provider call should trigger failover to the next configured vendor or be
/// surfaced to the caller immediately.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Represents transport-layer or networking failures, including timeouts.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Reports invalid or missing credentials (HTTP 401/403).
    #[error("auth failure: {message}")]
    Auth { message: String },
    /// Indicates that the provider throttled the request (HTTP 429).
    #[error("rate limited: {message}")]
    RateLimit {
        /// Raw message returned by the upstream provider.
        message: String,
        /// Optional wait duration suggested by the provider before retrying.
        retry_after: Option<Duration>,
    },
    /// Signals validation failures in the request payload (HTTP 400).
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Wraps provider-side failures: 5xx responses, unexpected 4xx codes,
    /// and success bodies that could not be parsed.
    #[error("provider {provider} error: {message}")]
    Provider {
        /// Name of the provider, such as `groq`.
        provider: &'static str,
        /// Human-readable error message returned by the provider.
        message: String,
    },
    /// Raised when loading or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// Raised when a provider is selected by name but is not configured.
    #[error("provider not available: {name}")]
    ProviderUnavailable { name: String },
}

impl ChatError {
    /// Creates a [`ChatError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use kaiwa::error::ChatError;
    ///
    /// let err = ChatError::transport("dns lookup failed");
    /// assert!(matches!(err, ChatError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a [`ChatError::Provider`] with the given provider name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use kaiwa::error::ChatError;
    ///
    /// let err = ChatError::provider("groq", "bad JSON payload");
    /// assert!(matches!(err, ChatError::Provider { provider: "groq", .. }));
    /// ```
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Returns `true` when the failure is worth retrying against another
    /// provider.
    ///
    /// Transport failures, rate limits that survived the local retry budget,
    /// and opaque provider errors (5xx, malformed bodies) are transient. Auth
    /// and request-validation failures indicate a configuration or input
    /// problem and stop the exchange immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::RateLimit { .. } | Self::Provider { .. }
        )
    }
}
