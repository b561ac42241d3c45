//! Utility functions for HTTP clients, retries and log-friendly text.

use reqwest::Client as HttpClient;
use std::time::Duration;
use tokio_retry::Retry;
use tracing::warn;

use crate::config::get_http_timeout_secs;

/// Creates an HTTP client configured with the standard request timeout.
///
/// Uses `HTTP_TIMEOUT_SECS` environment variable or 30s default.
#[must_use]
pub fn create_http_client() -> HttpClient {
    let timeout = Duration::from_secs(get_http_timeout_secs());
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Delays between attempts of a linear back-off: `base`, `2 * base`, `3 * base`, ...
///
/// Yields `max_attempts - 1` delays, so the operation runs at most `max_attempts` times.
pub fn linear_backoff(base: Duration, max_attempts: usize) -> impl Iterator<Item = Duration> {
    (1..).take(max_attempts.saturating_sub(1)).map(move |n: u32| base * n)
}

/// Retry an async operation with a linear back-off.
///
/// Used for startup work against flaky remote APIs (login, member lookup).
/// Each failure is logged with the attempt number; the last error is returned
/// once all attempts are exhausted.
///
/// # Examples
///
/// ```no_run
/// use song_requester::utils::retry_with_backoff;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), std::io::Error> {
/// let value = retry_with_backoff("load members", 3, Duration::from_secs(10), || async {
///     Ok::<_, std::io::Error>(42)
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(
    label: &str,
    max_attempts: usize,
    base: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0usize;
    Retry::spawn(linear_backoff(base, max_attempts), || {
        attempt += 1;
        let current = attempt;
        let fut = operation();
        async move {
            fut.await.map_err(|e| {
                warn!("{} attempt {}/{} failed: {}", label, current, max_attempts, e);
                e
            })
        }
    })
    .await
}

/// Safely truncates a string to a maximum character length (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use song_requester::utils::truncate_str;
/// let s = "Přidáno do fronty";
/// assert_eq!(truncate_str(s, 7), "Přidáno");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Trim an HTTP error body for logs, hiding HTML error pages from proxies.
#[must_use]
pub fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim_start();
    let is_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");
    if is_html {
        return "(Server returned HTML error page)".to_string();
    }
    let short = truncate_str(trimmed, 300);
    if short.len() < trimmed.len() {
        format!("{short}... (truncated)")
    } else {
        short
    }
}
