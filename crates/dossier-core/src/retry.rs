//! Bounded exponential-backoff retry for idempotent external calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cancel::CancelSignal;
use crate::error::{DossierError, DossierResult, ServiceError};

/// Retry schedule: `min(base * 2^(attempt-1), max)` between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 16_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Run `op` under `policy`, retrying only transient service failures.
///
/// Cancellation is checked before every attempt and during every backoff
/// sleep; a cancelled run returns [`DossierError::Cancelled`]. Permanent
/// failures (4xx other than 429, invalid responses) are returned at once.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    cancel: &CancelSignal,
    mut op: F,
) -> DossierResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 1;
    loop {
        cancel.check()?;

        let err = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DossierError::Cancelled),
            result = op(attempt) => match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            },
        };

        if !err.is_transient() || attempt >= policy.max_attempts {
            return Err(DossierError::Service(err));
        }

        let delay = policy.delay_after(attempt);
        warn!(
            event = "retry.scheduled",
            label = %label,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
        );
        cancel.sleep(delay).await?;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_schedule_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_millis(2_000));
        assert_eq!(p.delay_after(2), Duration::from_millis(4_000));
        assert_eq!(p.delay_after(3), Duration::from_millis(8_000));
        assert_eq!(p.delay_after(5), Duration::from_millis(16_000));
        assert_eq!(p.delay_after(40), Duration::from_millis(16_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = with_retry("poll", &RetryPolicy::default(), &CancelSignal::never(), move |_| {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ServiceError::http("synthesis", 503, "unavailable"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: DossierResult<()> =
            with_retry("poll", &RetryPolicy::default(), &CancelSignal::never(), move |_| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::http("synthesis", 429, "rate limited"))
                }
            })
            .await;
        assert!(matches!(result, Err(DossierError::Service(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: DossierResult<()> =
            with_retry("poll", &RetryPolicy::default(), &CancelSignal::never(), move |_| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::http("synthesis", 404, "no such job"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let (handle, signal) = crate::cancel::CancelHandle::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.cancel();
        });
        let result: DossierResult<()> = with_retry("poll", &RetryPolicy::default(), &signal, move |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::http("synthesis", 500, "boom"))
            }
        })
        .await;
        canceller.await.unwrap();
        assert!(matches!(result, Err(DossierError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
