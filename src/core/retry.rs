use std::fmt::Display;
use std::future::Future;

use tokio::time::{sleep, Duration};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, max_delay: Duration) -> Self {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_secs(1),
            max_delay,
        }
    }

    /// Delay after the given zero-based failed attempt: `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds or the attempts run out.
/// Returns `None` once every attempt has failed.
pub async fn retry_operation<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    for attempt in 0..policy.attempts {
        match operation().await {
            Ok(value) => return Some(value),
            Err(e) if attempt + 1 < policy.attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    label,
                    attempt + 1,
                    policy.attempts,
                    e,
                    delay
                );
                sleep(delay).await;
            }
            Err(e) => {
                error!("{} failed after {} attempts: {}", label, policy.attempts, e);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(30));
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_operation(&fast(3), "login", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("attempt {} failed", n))
                } else {
                    Ok("logged in")
                }
            }
        })
        .await;

        assert_eq!(result, Some("logged in"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_none() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Option<()> = retry_operation(&fast(3), "login", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("no session")
            }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
