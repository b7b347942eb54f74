//! # Bounded Retry
//!
//! Re-runs a whole transactional operation when SQLite reports an
//! infrastructure failure (busy, locked, pool exhausted).
//!
//! ## Retry Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Retry Loop                                       │
//! │                                                                         │
//! │   attempt ──► Ok ─────────────────────────────────────► return Ok       │
//! │      │                                                                  │
//! │      ├──► Err(Domain / constraint) ───────────────────► return Err      │
//! │      │                                                                  │
//! │      └──► Err(Busy / PoolExhausted)                                     │
//! │               │                                                         │
//! │               ├── attempts left? ──► sleep(backoff) ──► attempt again   │
//! │               └── none left ──────► RetriesExhausted                    │
//! │                                                                         │
//! │   backoff: 10ms → 20ms → 40ms ... capped at 200ms (jittered)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each attempt opens its own transaction, so a failed attempt has already
//! rolled back before the next one starts.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{DbError, DbResult};

/// How many times, and how patiently, to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_config(&EngineConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_retries.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }

    /// Single attempt, no retry.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // bounded by max_attempts instead
            ..Default::default()
        }
    }

    /// Runs `operation` until it succeeds, fails for a non-retryable
    /// reason, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let mut backoff = self.create_backoff();
        let mut retry_count = 0u32;

        loop {
            match attempt().await {
                Ok(value) => {
                    if retry_count > 0 {
                        debug!(operation, retry_count, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    retry_count += 1;
                    if retry_count >= self.max_attempts {
                        warn!(operation, attempts = retry_count, error = %err, "Retries exhausted");
                        return Err(DbError::RetriesExhausted {
                            attempts: retry_count,
                            last: err.to_string(),
                        });
                    }

                    let delay = backoff.next_backoff().unwrap_or(self.max_backoff);
                    warn!(operation, attempt = retry_count, ?delay, error = %err, "Retrying after infrastructure failure");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use settle_core::CoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_busy_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(5)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DbError::Busy("database is locked".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: DbResult<()> = fast_policy(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DbError::PoolExhausted)
            })
            .await;

        assert!(matches!(result, Err(DbError::RetriesExhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_domain_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: DbResult<()> = fast_policy(5)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DbError::Domain(CoreError::CodeAlreadyUsed))
            })
            .await;

        assert!(matches!(result, Err(DbError::Domain(CoreError::CodeAlreadyUsed))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from_config(&EngineConfig::default());
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
