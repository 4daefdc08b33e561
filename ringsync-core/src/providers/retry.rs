use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff capped at `max_delay_ms`, plus a deterministic jitter.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt as u32).min(12);
        let base = self.base_delay_ms.saturating_mul(1u64 << shift);
        let capped = base.min(self.max_delay_ms.max(self.base_delay_ms));
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            (attempt as u64 * 37) % (self.jitter_ms + 1)
        };
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Sends `builder`, retrying throttling, server errors and transport
/// failures. Non-retryable responses (including 404) are returned as-is.
pub async fn send_with_retry(
    builder: RequestBuilder,
    policy: &RetryPolicy,
    operation: &str,
) -> Result<Response> {
    let total_attempts = policy.max_retries.saturating_add(1);
    let mut last_failure = String::from("no attempt made");

    for attempt in 0..total_attempts {
        let Some(request) = builder.try_clone() else {
            return Err(Error::Provider(format!(
                "{operation} cannot be retried because its body is not clonable"
            )));
        };
        let is_last = attempt + 1 >= total_attempts;

        match request.send().await {
            Ok(response) if is_retryable_status(response.status()) && !is_last => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    status = %response.status(),
                    attempt,
                    total_attempts,
                    delay_ms = delay.as_millis(),
                    "retrying request after retryable HTTP status"
                );
                last_failure = format!("HTTP {}", response.status());
                sleep(delay).await;
            }
            Ok(response) => return Ok(response),
            Err(err) if is_retryable_transport_error(&err) && !is_last => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    error = %err,
                    attempt,
                    total_attempts,
                    delay_ms = delay.as_millis(),
                    "retrying request after transport error"
                );
                last_failure = err.to_string();
                sleep(delay).await;
            }
            Err(err) => {
                return Err(Error::Provider(format!("{operation} failed: {err}")));
            }
        }
    }

    Err(Error::Provider(format!(
        "{operation} failed after {total_attempts} attempts: {last_failure}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_ms: 0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(9), Duration::from_millis(1_000));
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }
}
