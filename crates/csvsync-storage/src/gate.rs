//! Process-wide cooldown in front of every Gmail API call.
//!
//! A 429 opens a cooldown window shared by all Gmail providers built from
//! the same gate, so one schedule hitting the quota keeps the others from
//! walking into it too.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::error::StorageError;

/// Used when neither a header nor the message says how long to back off.
pub const FALLBACK_COOLDOWN: Duration = Duration::from_secs(15);

pub const DEFAULT_JITTER_MAX: Duration = Duration::from_millis(1500);

/// What to do with a call that arrives during a cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateMode {
    /// Sleep until the cooldown ends, then call.
    Wait,
    /// Fail fast with [`StorageError::Deferred`].
    #[default]
    Defer,
}

pub struct GmailRequestGate {
    cooldown_until: Mutex<Option<DateTime<Utc>>>,
    jitter_max: Duration,
}

impl Default for GmailRequestGate {
    fn default() -> Self {
        Self::new()
    }
}

impl GmailRequestGate {
    pub fn new() -> Self {
        Self {
            cooldown_until: Mutex::new(None),
            jitter_max: DEFAULT_JITTER_MAX,
        }
    }

    pub fn with_jitter_max(mut self, jitter_max: Duration) -> Self {
        self.jitter_max = jitter_max;
        self
    }

    /// End of the active cooldown, if any.
    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        let until = (*self.cooldown_until.lock().ok()?)?;
        (until > Utc::now()).then_some(until)
    }

    /// Extend the cooldown to `until` (never shortens it).
    pub fn enter_cooldown(&self, until: DateTime<Utc>) {
        if let Ok(mut current) = self.cooldown_until.lock() {
            *current = Some(current.map_or(until, |c| c.max(until)));
        }
    }

    /// Run one Gmail call through the gate.
    ///
    /// A rate-limited call records a cooldown. In `Defer` mode it then
    /// surfaces as `Deferred`; in `Wait` mode it stays `RateLimited` with
    /// the cooldown as its retry-after, so the caller's backoff sleeps it out.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mode: GateMode, f: F) -> Result<T, StorageError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        if let Some(until) = self.cooldown_until() {
            match mode {
                GateMode::Defer => {
                    tracing::debug!("⏸️ Gmail {} deferred until {}", operation, until.to_rfc3339());
                    return Err(StorageError::Deferred {
                        operation: operation.to_string(),
                        until,
                    });
                }
                GateMode::Wait => {
                    let wait = (until - Utc::now()).to_std().unwrap_or_default();
                    tracing::info!("⏸️ Gmail {} waiting {:?} for cooldown", operation, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }

        match f().await {
            Err(StorageError::RateLimited { message, retry_after }) => {
                let delay = retry_after
                    .filter(|d| !d.is_zero())
                    .or_else(|| retry_after_from_message(&message, Utc::now()))
                    .unwrap_or(FALLBACK_COOLDOWN);
                let until = Utc::now()
                    + chrono::Duration::from_std(delay + self.jitter())
                        .unwrap_or_else(|_| chrono::Duration::seconds(15));
                self.enter_cooldown(until);
                tracing::warn!(
                    operation,
                    retry_after_ms = delay.as_millis() as u64,
                    cooldown_until = %until.to_rfc3339(),
                    "🚦 Gmail rate limit detected; entering cooldown"
                );
                match mode {
                    GateMode::Defer => Err(StorageError::Deferred {
                        operation: operation.to_string(),
                        until,
                    }),
                    GateMode::Wait => Err(StorageError::RateLimited {
                        message,
                        retry_after: (until - Utc::now()).to_std().ok(),
                    }),
                }
            }
            other => other,
        }
    }

    fn jitter(&self) -> Duration {
        let max = self.jitter_max.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max))
    }
}

/// Parse `Retry after 2026-02-19T11:33:04.778Z` out of an error message.
pub fn retry_after_from_message(message: &str, now: DateTime<Utc>) -> Option<Duration> {
    let lower = message.to_ascii_lowercase();
    let start = lower.find("retry after ")? + "retry after ".len();
    let stamp: String = message[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, 'T' | 'Z' | ':' | '.' | '-' | '+'))
        .collect();
    let at = DateTime::parse_from_rfc3339(&stamp).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok().filter(|d| !d.is_zero())
}
