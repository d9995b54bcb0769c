//! Provider-level backoff for rate limits and network blips.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::StorageError;

/// Retries after the first attempt for transient failures.
pub const MAX_TRANSIENT_RETRIES: u32 = 5;

/// Ceiling for the exponential fallback delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// `Retry-After` when the server sent one, else `2^attempt` seconds capped at 30s.
pub fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    match retry_after {
        Some(delay) => delay,
        None => Duration::from_secs(2u64.saturating_pow(attempt)).min(MAX_BACKOFF),
    }
}

/// Parse a delta-seconds `Retry-After` header.
pub fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Run `op`, retrying transient failures with [`backoff_delay`].
pub async fn retry_transient<T, F, Fut>(provider: &str, operation: &str, mut op: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < MAX_TRANSIENT_RETRIES => {
                let delay = backoff_delay(attempt, e.retry_after());
                tracing::warn!(
                    "⏳ {} {} hit a transient error (retry {}/{} in {:?}): {}",
                    provider,
                    operation,
                    attempt + 1,
                    MAX_TRANSIENT_RETRIES,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delay_schedule() {
        assert_eq!(backoff_delay(0, None), Duration::from_secs(1));
        assert_eq!(backoff_delay(3, None), Duration::from_secs(8));
        assert_eq!(backoff_delay(5, None), MAX_BACKOFF);
        assert_eq!(backoff_delay(40, None), MAX_BACKOFF);
        assert_eq!(
            backoff_delay(2, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_header(&headers), None);
        headers.insert(RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(retry_after_header(&headers), Some(Duration::from_secs(12)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried_then_succeed() {
        let calls = AtomicU32::new(0);
        let result = retry_transient("test", "download", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StorageError::Network("reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient("test", "upload", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StorageError::RateLimited {
                    message: "slow down".into(),
                    retry_after: None,
                })
            }
        })
        .await;
        assert!(matches!(result, Err(StorageError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_TRANSIENT_RETRIES + 1);
    }

    #[tokio::test]
    async fn test_fatal_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient("test", "download", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::NotFound("/x.csv".into())) }
        })
        .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
