use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::ChatError;

/// Fixed backoff applied when the provider does not suggest a wait time.
pub(crate) const RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(1500);

/// Upper bound on any single backoff sleep, whatever the vendor suggests.
pub(crate) const RATE_LIMIT_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Number of local retries granted to a rate-limited call before the error
/// escalates to the dispatcher as transient.
pub(crate) const RATE_LIMIT_RETRIES: usize = 2;

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// Providers occasionally instruct clients to wait before re-sending requests. When the
/// header is numeric this helper parses it into a [`Duration`]. HTTP-date values are
/// currently ignored because vendors primarily use the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Runs `op`, retrying only on [`ChatError::RateLimit`] within the local budget.
///
/// Each retry waits for the provider-suggested `retry_after` when available,
/// otherwise for [`RATE_LIMIT_BACKOFF`]. The wait is clamped to
/// [`RATE_LIMIT_MAX_BACKOFF`] so a hostile or misconfigured vendor cannot
/// stall an exchange with an hour-long `Retry-After`. Any other error, and a
/// rate limit that outlives the budget, is returned to the caller untouched.
pub(crate) async fn with_rate_limit_retry<T, F, Fut>(
    provider: &'static str,
    op: F,
) -> Result<T, ChatError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(ChatError::RateLimit {
                message,
                retry_after,
            }) if attempt < RATE_LIMIT_RETRIES => {
                attempt += 1;
                let wait = retry_after
                    .unwrap_or(RATE_LIMIT_BACKOFF)
                    .min(RATE_LIMIT_MAX_BACKOFF);
                debug!(provider, attempt, wait_ms = wait.as_millis() as u64, %message, "rate limited, backing off");
                tokio::time::sleep(wait).await;
            }
            other => return other,
        }
    }
}
