//! Bounded waiting helpers.
//!
//! Every external call the runner makes is bounded: either by a single
//! deadline (`bounded`) or by a polling loop with exponential backoff
//! (`poll_until`). Both surface expiry as `RunnerError::Timeout` so callers
//! can tell a hang apart from a failure.

use crate::errors::RunnerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Result of one polling probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The condition holds; stop polling.
    Ready(T),
    /// Not yet; poll again after the current delay.
    Pending,
}

/// Backoff parameters for `poll_until`.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Overall deadline.
    pub timeout: Duration,
    /// Delay before the second probe.
    pub initial_delay: Duration,
    /// Upper bound on the delay between probes.
    pub max_delay: Duration,
}

impl PollPolicy {
    /// Policy with the default backoff (5s doubling up to 60s).
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Run `fut` with a deadline, mapping expiry to `RunnerError::Timeout`.
pub async fn bounded<T, Fut>(operation: &str, limit: Duration, fut: Fut) -> Result<T, RunnerError>
where
    Fut: Future<Output = Result<T, RunnerError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                target: "e2e.eventual",
                operation = %operation,
                timeout_secs = limit.as_secs(),
                "Operation timed out"
            );
            Err(RunnerError::timeout(operation, limit))
        }
    }
}

/// Poll `probe` until it reports `Ready` or the policy's deadline passes.
///
/// Uses exponential backoff with a 2x multiplier, capped at `max_delay` and
/// at the time remaining. A probe error ends polling immediately.
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    policy: PollPolicy,
    mut probe: F,
) -> Result<T, RunnerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, RunnerError>>,
{
    let start = Instant::now();
    let mut delay = policy.initial_delay;

    loop {
        if let Probe::Ready(value) = probe().await? {
            return Ok(value);
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(RunnerError::timeout(operation, policy.timeout));
        }

        let remaining = policy.timeout.saturating_sub(elapsed);
        sleep(delay.min(remaining)).await;

        delay = delay.saturating_mul(2).min(policy.max_delay);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(timeout: Duration) -> PollPolicy {
        PollPolicy {
            timeout,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        }
    }

    #[tokio::test]
    async fn test_bounded_passes_through_result() {
        let result = bounded("quick", Duration::from_secs(1), async { Ok::<_, RunnerError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result = bounded("slow call", Duration::from_secs(1), async {
            sleep(Duration::from_secs(10)).await;
            Ok::<_, RunnerError>(())
        })
        .await;

        let err = result.expect_err("should time out");
        assert!(err.is_timeout());
        assert!(err.to_string().contains("slow call"));
    }

    #[tokio::test]
    async fn test_poll_until_ready_immediately() {
        let result = poll_until("ready", fast_policy(Duration::from_secs(1)), || async {
            Ok(Probe::Ready("done"))
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_ready_after_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result = poll_until("cluster ready", fast_policy(Duration::from_secs(5)), move || {
            let attempts = attempts_clone.clone();
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= 3 {
                    Ok(Probe::Ready(count))
                } else {
                    Ok(Probe::Pending)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let result: Result<(), _> = poll_until(
            "never ready",
            fast_policy(Duration::from_millis(200)),
            || async { Ok(Probe::Pending) },
        )
        .await;

        let err = result.expect_err("should time out");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_poll_until_stops_on_probe_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<(), _> =
            poll_until("failing", fast_policy(Duration::from_secs(5)), move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(RunnerError::Provision("cluster entered error state".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(RunnerError::Provision(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
