use super::backoff::Backoff;
use reqwest::StatusCode;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("network request failed after {attempts} attempts: {source}")]
pub struct RetryError {
    pub attempts: u32,
    #[source]
    pub source: reqwest::Error,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Retries a request closure with exponential backoff.
/// Retries on:
/// - Network errors
/// - 429 Too Many Requests (respects Retry-After header)
/// - 5xx Server Errors
///
/// Returns the last Response (even if error status) or the last network error.
pub async fn request_with_retry<F, Fut>(
    mut task: F,
    policy: RetryPolicy,
) -> Result<reqwest::Response, RetryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    let mut backoff = Backoff::new(policy.initial_delay, policy.max_delay);

    loop {
        attempt += 1;
        match task().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || attempt > policy.max_retries {
                    return Ok(response);
                }

                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    let fallback = backoff.next_delay();
                    let retry_delay = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or(fallback);

                    tracing::warn!(
                        %status,
                        delay = ?retry_delay,
                        attempt,
                        max_retries = policy.max_retries,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(retry_delay).await;
                    continue;
                }

                // Other client errors (400, 401, 404) are permanent.
                return Ok(response);
            }
            Err(e) => {
                if attempt > policy.max_retries {
                    return Err(RetryError {
                        attempts: attempt,
                        source: e,
                    });
                }
                let delay = backoff.next_delay();
                tracing::warn!(
                    error = %e,
                    delay = ?delay,
                    attempt,
                    max_retries = policy.max_retries,
                    "network error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
