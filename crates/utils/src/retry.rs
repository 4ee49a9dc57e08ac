//! Generic retry and polling helpers.
//!
//! Two shapes recur throughout the backend drivers (§4.1, §9):
//! - "poll a vendor API until it reaches a terminal state" (managed-runtime
//!   drivers, readiness waits)
//! - "retry a flaky call with exponential backoff and jitter" (vendor API
//!   calls prone to throttling, §7)
//!
//! Both are factored out here so every driver reduces to supplying a
//! `fetch` closure and a `is_terminal` predicate, rather than duplicating
//! the loop.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    #[error("polling timed out after {attempts} attempts; last status: {last_status}")]
    Timeout {
        attempts: u32,
        last_status: String,
    },
    #[error(transparent)]
    Fetch(#[from] E),
}

/// Polls `fetch` repeatedly, sleeping `interval` between attempts, until
/// `is_terminal` accepts the returned status or `max_attempts` is exhausted.
pub async fn poll_until_terminal<S, E, F, Fut, T>(
    mut fetch: F,
    mut is_terminal: T,
    max_attempts: u32,
    interval: Duration,
) -> Result<S, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<S, E>>,
    T: FnMut(&S) -> bool,
    S: std::fmt::Debug,
{
    let mut last_status = String::from("<none>");
    for attempt in 1..=max_attempts {
        let status = fetch().await?;
        last_status = format!("{status:?}");
        if is_terminal(&status) {
            return Ok(status);
        }
        tracing::debug!(attempt, max_attempts, status = %last_status, "waiting for terminal state");
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(PollError::Timeout {
        attempts: max_attempts,
        last_status,
    })
}

/// Retries `op` with exponential backoff and full jitter, grounded on the
/// teacher's `backon`-style retry wrapper but hand-rolled here to avoid an
/// extra dependency for a handful of call sites. Gives up after
/// `max_attempts`, returning the last error.
pub async fn retry_with_backoff<E, F, Fut, T>(
    mut op: F,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let exp = base_delay.saturating_mul(1 << (attempt - 1).min(16));
                let capped = exp.min(max_delay);
                let jittered = Duration::from_millis(
                    rand::rng().random_range(0..=capped.as_millis().max(1) as u64),
                );
                tracing::warn!(attempt, max_attempts, delay_ms = jittered.as_millis() as u64, "retrying after error: {e}");
                tokio::time::sleep(jittered).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn poll_succeeds_once_terminal() {
        let calls = AtomicU32::new(0);
        let result = poll_until_terminal::<_, std::convert::Infallible, _, _, _>(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            },
            |n: &u32| *n >= 2,
            10,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn poll_times_out() {
        let result = poll_until_terminal::<_, std::convert::Infallible, _, _, _>(
            || async { Ok(0u32) },
            |_: &u32| false,
            3,
            Duration::from_millis(1),
        )
        .await;
        assert!(matches!(result, Err(PollError::Timeout { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("always fails")
            },
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
