use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};

/// Longest wait honored from a `Retry-After` header.
const MAX_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Attempt `n` waits `min(2^n, 30)` of these before resending.
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_unit: Duration::from_secs(1),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = std::cmp::min(1u64 << attempt.min(5), 30);
        self.backoff_unit * factor as u32
    }
}

/// Whether a request may be replayed once the server could have acted on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Idempotent,
    /// Replayed only when it provably never took effect: connect errors and 429.
    AtMostOnce,
}

/// Send a request built by `build`, retrying timeouts, connect errors, 5xx and 429.
///
/// Other non-success statuses fail fast with [`HttpError::Status`].
pub async fn send_with_retry<F>(policy: &RetryPolicy, build: F) -> Result<Response, HttpError>
where
    F: FnMut() -> RequestBuilder,
{
    send(policy, Delivery::Idempotent, build).await
}

/// Like [`send_with_retry`], for requests that create something. A timeout or
/// 5xx is returned as is, since the server may already have committed it.
pub async fn send_at_most_once<F>(policy: &RetryPolicy, build: F) -> Result<Response, HttpError>
where
    F: FnMut() -> RequestBuilder,
{
    send(policy, Delivery::AtMostOnce, build).await
}

async fn send<F>(policy: &RetryPolicy, delivery: Delivery, mut build: F) -> Result<Response, HttpError>
where
    F: FnMut() -> RequestBuilder,
{
    let replayable = delivery == Delivery::Idempotent;
    let mut last_error = String::new();

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            tracing::warn!(attempt, backoff_ms = backoff.as_millis() as u64, "retrying after backoff");
            tokio::time::sleep(backoff).await;
        }

        let response = match build().send().await {
            Ok(resp) => resp,
            Err(e) => {
                last_error = e.to_string();
                if e.is_connect() || (replayable && e.is_timeout()) {
                    continue;
                }
                return Err(HttpError::Request(e));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(retry_after) = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
            {
                let wait = std::cmp::min(retry_after, MAX_RETRY_AFTER_SECS);
                tracing::warn!(wait, "rate-limited, waiting Retry-After");
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
            last_error = "429 Too Many Requests".to_owned();
            continue;
        }

        if status.is_server_error() && replayable {
            let body = response.text().await.unwrap_or_default();
            last_error = format!("{status}: {body}");
            continue;
        }

        let body = response.text().await.unwrap_or_default();
        return Err(HttpError::Status { status, body });
    }

    Err(HttpError::MaxRetriesExceeded {
        attempts: policy.max_retries + 1,
        last_error,
    })
}
