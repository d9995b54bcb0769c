//! Bounded retry around whole import attempts.
//!
//! Any error is retried. Providers already filter transient from fatal
//! conditions internally, so a permanent failure here only costs the
//! configured number of extra attempts.

use std::future::Future;
use std::time::Duration;

use csvsync_core::RetryPolicy;

use crate::error::ImportError;

/// Delay before the retry that follows attempt `attempt` (0-based).
pub fn retry_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.retry_interval_secs;
    let secs = if policy.exponential_backoff {
        base.saturating_mul(2u64.saturating_pow(attempt))
    } else {
        base
    };
    Duration::from_secs(secs)
}

/// Run `attempt_fn` up to `max_retries + 1` times.
///
/// The final error names the attempt count and wraps the last failure.
pub async fn retry<T, F, Fut>(label: &str, policy: &RetryPolicy, mut attempt_fn: F) -> Result<T, ImportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ImportError>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("✅ {} succeeded on attempt {}", label, attempt + 1);
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.max_retries => {
                let delay = retry_delay(policy, attempt);
                tracing::warn!(
                    "🔁 {} attempt {}/{} failed, retrying in {:?}: {}",
                    label,
                    attempt + 1,
                    policy.max_retries.saturating_add(1),
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(ImportError::RetriesExhausted {
                    attempts: attempt + 1,
                    source: Box::new(e),
                });
            }
        }
    }
}
