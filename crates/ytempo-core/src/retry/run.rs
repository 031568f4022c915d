//! Retry loop: drive pipeline attempts until success or policy says stop.

use std::future::Future;
use std::time::Duration;

use super::classify::{classify, ClassifiedError};
use super::policy::{RetryDecision, RetryPolicy};

/// Runs `attempt` until it succeeds or the retry policy says to stop.
///
/// Each attempt is bounded by `attempt_timeout`; exceeding it counts as a
/// retryable timeout. On a retryable failure with budget remaining,
/// `on_retry` is invoked with the new retry count (1-based) before the
/// backoff sleep, so observers can surface "retrying (n/m)".
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    attempt_timeout: Duration,
    mut attempt: F,
    mut on_retry: impl FnMut(u32),
) -> Result<T, ClassifiedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut retries = 0u32;
    loop {
        let result = match tokio::time::timeout(attempt_timeout, attempt()).await {
            Ok(r) => r,
            Err(_) => Err(anyhow::anyhow!(
                "attempt timed out after {}s",
                attempt_timeout.as_secs()
            )),
        };

        let err = match result {
            Ok(v) => return Ok(v),
            Err(e) => classify(&format!("{e:#}")),
        };

        match policy.decide(retries, err.kind) {
            RetryDecision::NoRetry => return Err(err),
            RetryDecision::RetryAfter(delay) => {
                retries += 1;
                tracing::debug!(
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after {}",
                    err.user_message
                );
                on_retry(retries);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::policy::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn quick_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let retries_seen = AtomicU32::new(0);
        let started = Instant::now();

        let result = run_with_retry(
            &quick_policy(5),
            Duration::from_secs(60),
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(anyhow::anyhow!("connection reset by peer"))
                    } else {
                        Ok(42u32)
                    }
                }
            },
            |n| retries_seen.store(n, Ordering::SeqCst),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(retries_seen.load(Ordering::SeqCst), 2);
        // Backoff before jitter: base + 2*base = 300ms.
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn non_retryable_fails_on_first_attempt() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(
            &quick_policy(10),
            Duration::from_secs(60),
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("ERROR: Private video")) }
            },
            |_| panic!("must not retry"),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::SourcePrivate);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(
            &quick_policy(2),
            Duration::from_secs(60),
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("network is unreachable")) }
            },
            |_| {},
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_is_classified_as_timeout() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(
            &quick_policy(1),
            Duration::from_millis(50),
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            },
            |_| {},
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        // Timeout is retryable, so the budget of one retry was used.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
