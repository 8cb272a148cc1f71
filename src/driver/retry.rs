//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::{DriverError, DriverResult};

/// Context handed to the retry callback before each sleep.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// 1-indexed attempt that just failed
    pub attempt: u32,
    /// The error it failed with
    pub error: DriverError,
    /// How long the coordinator will sleep before the next attempt
    pub next_delay: Duration,
    /// Total sleep accumulated so far, including `next_delay`
    pub cumulative_delay: Duration,
}

/// Retry behavior: attempt budget, backoff shape, and observer callbacks.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound on a single delay (before jitter)
    pub max_delay: Duration,
    /// Backoff multiplier per attempt
    pub multiplier: f64,
    /// Jitter factor in [0, 1]: 0 = none, 1 = full jitter
    pub jitter: f64,

    /// Fires before each sleep
    pub on_retry: Option<Arc<dyn Fn(&RetryContext) + Send + Sync>>,
    /// Fires once on success, with the attempt that succeeded
    pub on_success: Option<Arc<dyn Fn(u32) + Send + Sync>>,
    /// Fires once when giving up, with the final error and attempt count
    pub on_failure: Option<Arc<dyn Fn(&DriverError, u32) + Send + Sync>>,
}

impl RetryPolicy {
    /// Sensible defaults: 5 attempts, 100 ms base, 10 s cap, doubling,
    /// full jitter.
    pub fn new() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 1.0,
            on_retry: None,
            on_success: None,
            on_failure: None,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::new()
        }
    }

    /// Compute the delay for a 1-indexed attempt:
    /// `min(max_delay, base * multiplier^(attempt-1))` scaled by
    /// `1 - jitter + U[0,1) * jitter`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);

        let exponent = (attempt - 1) as f64;
        let backoff = self.base_delay.as_secs_f64() * self.multiplier.powf(exponent);
        let capped = backoff.min(self.max_delay.as_secs_f64());

        let jitter = self.jitter.clamp(0.0, 1.0);
        let blend = 1.0 - jitter + rand::random::<f64>() * jitter;

        Duration::from_secs_f64(capped * blend)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .finish()
    }
}

/// Run `op` until it succeeds, exhausts the attempt budget, or fails with a
/// non-retriable error.
///
/// Dropping the returned future aborts any outstanding sleep; cancellation
/// errors surfacing from `op` are not retriable.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> DriverResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DriverResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut cumulative_delay = Duration::ZERO;
    let mut last_err: Option<DriverError> = None;

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => {
                if let Some(on_success) = &policy.on_success {
                    on_success(attempt);
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_retriable() {
                    debug!(attempt, %err, "error is not retriable, giving up");
                    if let Some(on_failure) = &policy.on_failure {
                        on_failure(&err, attempt);
                    }
                    return Err(err);
                }

                if attempt >= max_attempts {
                    last_err = Some(err);
                    break;
                }

                let delay = policy.calculate_delay(attempt);
                cumulative_delay += delay;
                warn!(attempt, %err, ?delay, "retrying after transient error");

                if let Some(on_retry) = &policy.on_retry {
                    on_retry(&RetryContext {
                        attempt,
                        error: err.clone(),
                        next_delay: delay,
                        cumulative_delay,
                    });
                }
                last_err = Some(err);

                tokio::time::sleep(delay).await;
            }
        }
    }

    let source = last_err.unwrap_or_else(|| DriverError::usage("retry loop without attempts"));
    if let Some(on_failure) = &policy.on_failure {
        on_failure(&source, max_attempts);
    }

    Err(DriverError::RetryExhausted {
        attempts: max_attempts,
        total_delay: cumulative_delay,
        source: Box::new(source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> DriverError {
        DriverError::database("Neo.TransientError.General.DatabaseUnavailable", "timeout")
    }

    fn fatal() -> DriverError {
        DriverError::database("Neo.ClientError.Statement.SyntaxError", "bad input")
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
            ..RetryPolicy::new()
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.jitter, 1.0);
    }

    #[test]
    fn test_delay_without_jitter_is_exponential() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::new()
        };
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(400));
        // Capped at max_delay
        assert_eq!(policy.calculate_delay(20), Duration::from_secs(10));
    }

    #[test]
    fn test_full_jitter_stays_within_envelope() {
        let policy = RetryPolicy::new();
        for attempt in 1..=8 {
            let delay = policy.calculate_delay(attempt);
            let ceiling = Duration::from_millis(100 * 2u64.pow(attempt - 1))
                .min(Duration::from_secs(10));
            assert!(delay <= ceiling, "attempt {}: {:?} > {:?}", attempt, delay, ceiling);
        }
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast_policy(5), || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Ok::<_, DriverError>(42) }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        // Fails twice with a timeout-flavored database error, then succeeds.
        let calls = AtomicU32::new(0);
        let result = retry(&fast_policy(5), || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                if attempt <= 2 {
                    Err(transient())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_non_retriable_invoked_exactly_once() {
        let calls = AtomicU32::new(0);
        let err = retry(&fast_policy(5), || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err::<(), _>(fatal()) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(matches!(err, DriverError::Database { .. }));
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let err = retry(&fast_policy(3), || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err::<(), _>(transient()) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::Relaxed), 3);
        match err {
            DriverError::RetryExhausted {
                attempts,
                total_delay,
                source,
            } => {
                assert_eq!(attempts, 3);
                // Two sleeps happened, each bounded by max_delay.
                assert!(total_delay <= Duration::from_millis(10));
                assert!(matches!(*source, DriverError::Database { .. }));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_attempt_policy() {
        let calls = AtomicU32::new(0);
        let err = retry(&RetryPolicy::no_retry(), || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err::<(), _>(transient()) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(matches!(err, DriverError::RetryExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_callbacks_fire() {
        let retries = Arc::new(AtomicU32::new(0));
        let successes = Arc::new(AtomicU32::new(0));

        let policy = RetryPolicy {
            on_retry: Some(Arc::new({
                let retries = retries.clone();
                move |ctx: &RetryContext| {
                    assert!(ctx.next_delay <= ctx.cumulative_delay);
                    retries.fetch_add(1, Ordering::Relaxed);
                }
            })),
            on_success: Some(Arc::new({
                let successes = successes.clone();
                move |attempt| {
                    assert_eq!(attempt, 2);
                    successes.fetch_add(1, Ordering::Relaxed);
                }
            })),
            ..fast_policy(5)
        };

        let calls = AtomicU32::new(0);
        retry(&policy, || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                if attempt == 1 {
                    Err(transient())
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(retries.load(Ordering::Relaxed), 1);
        assert_eq!(successes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_on_failure_fires_on_fatal() {
        let failures = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            on_failure: Some(Arc::new({
                let failures = failures.clone();
                move |_err: &DriverError, _attempts| {
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            })),
            ..fast_policy(5)
        };

        let _ = retry(&policy, || async { Err::<(), _>(fatal()) }).await;
        assert_eq!(failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_network_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast_policy(5), || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                if attempt == 1 {
                    Err(DriverError::connection("connection reset by peer"))
                } else {
                    Ok("up")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "up");
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_cancellation_not_retried() {
        let calls = AtomicU32::new(0);
        let err = retry(&fast_policy(5), || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err::<(), _>(DriverError::cancelled("caller gave up")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(matches!(err, DriverError::Cancelled(_)));
    }
}
