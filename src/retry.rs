// src/retry.rs
//! Small exponential-backoff helper shared by the oracle and storage stages.
//! Only transient errors are retried; everything else surfaces immediately.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{EnrichError, EnrichResult};

/// Run `op` up to `max_attempts` times, doubling the delay between attempts.
/// Non-transient errors short-circuit on the first occurrence.
pub async fn with_backoff<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    op: F,
) -> EnrichResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = EnrichResult<T>>,
{
    let attempts = max_attempts.max(1);
    let mut delay = base_delay;
    let mut last_err: Option<EnrichError> = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < attempts => {
                debug!(target: "retry", %e, attempt, "transient failure, backing off");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    // Unreachable: the loop always returns. Kept for totality.
    Err(last_err.unwrap_or_else(|| EnrichError::OracleTransient("retry budget exhausted".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let out = with_backoff(3, Duration::from_millis(1), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(EnrichError::OracleTransient("rate limit".into()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn schema_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let out: EnrichResult<()> = with_backoff(3, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EnrichError::OracleSchema("bad json".into()))
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let out: EnrichResult<()> = with_backoff(2, Duration::from_millis(1), || async {
            Err(EnrichError::StorageTransient("conn refused".into()))
        })
        .await;
        assert!(matches!(out, Err(EnrichError::StorageTransient(_))));
    }
}
