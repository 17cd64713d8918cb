use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ChatError;

/// Default per-call timeout applied to every provider request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Enumerates HTTP methods understood by the lightweight transport abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Minimal HTTP request representation shared across providers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request with a JSON request body and the default timeout.
    ///
    /// # Examples
    ///
    /// ```
    /// use kaiwa::http::{HttpMethod, HttpRequest};
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.method, HttpMethod::Post);
    /// assert_eq!(request.headers.get("Content-Type"), Some(&"application/json".to_string()));
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(body),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Overrides the request headers after construction.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Overrides the per-call timeout after construction.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Minimal HTTP response representation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Converts the body into a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] when the body cannot be interpreted as UTF-8.
    pub fn into_string(self) -> Result<String, ChatError> {
        String::from_utf8(self.body).map_err(|err| ChatError::transport(err.to_string()))
    }
}

/// Transport abstraction used to decouple providers from the concrete HTTP client.
///
/// Tests implement this trait to script vendor responses without opening
/// sockets; production code uses [`reqwest::ReqwestTransport`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves when the full response is available.
    ///
    /// # Errors
    ///
    /// Implementations should map network failures and timeouts to
    /// [`ChatError::Transport`].
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ChatError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// Serializes a body to JSON, attaches headers, and issues a bounded POST.
///
/// This helper centralizes JSON serialization so each provider can reuse the
/// same logic without duplicating header or error handling.
///
/// # Errors
///
/// Returns [`ChatError::Validation`] if serialization fails or forwards the
/// error raised by [`HttpTransport::send`].
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    timeout: Duration,
    body: &T,
) -> Result<HttpResponse, ChatError> {
    let payload = serde_json::to_vec(body).map_err(|err| ChatError::Validation {
        message: format!("failed to serialize request: {err}"),
    })?;
    let request = HttpRequest::post_json(url, payload)
        .with_headers(headers)
        .with_timeout(timeout);
    transport.send(request).await
}

pub mod reqwest;
