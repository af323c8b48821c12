//! Explicit retry policy for outbound collaborator calls.
//!
//! The policy is a plain value threaded into every call site rather than a
//! wrapper around the client: max attempts, exponential backoff with jitter,
//! and a max-delay cap. A rate limit response's Retry-After is honored on
//! top of the computed backoff, and successive calls through the same policy
//! are spaced by a minimum inter-call interval.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// Retry configuration for transient external failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied per retry.
    pub backoff_factor: f64,
    /// Cap on any single computed delay.
    pub max_delay: Duration,
    /// Fraction of the delay randomized away (0.0..=1.0).
    pub jitter: f64,
    /// Minimum spacing between successive outbound calls. Clones share the
    /// same pacing state.
    pub min_call_interval: Duration,

    last_call: Arc<Mutex<Option<Instant>>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
            min_call_interval: Duration::from_millis(250),
            last_call: Arc::new(Mutex::new(None)),
        }
    }
}

impl RetryPolicy {
    /// Compute the backoff delay for a zero-based retry index, with jitter.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(retry_index as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            let offset: f64 = rand::thread_rng().gen_range(-spread..=spread);
            (capped + offset).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }

    /// Wait until at least `min_call_interval` has elapsed since the previous
    /// outbound call through this policy. The lock is held across the wait so
    /// concurrent callers are spaced out, not released in a burst.
    async fn pace(&self) {
        if self.min_call_interval.is_zero() {
            return;
        }
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_call_interval {
                sleep(self.min_call_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget is
    /// exhausted. Only transient errors are retried; the last transient error
    /// is surfaced once the budget runs out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let mut delay = self.delay_for(attempt - 1);
                if let Some(server_wait) = last_err.as_ref().and_then(EngineError::retry_after) {
                    delay = delay.max(server_wait);
                }
                debug!(call = label, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                sleep(delay).await;
            }

            self.pace().await;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    warn!(call = label, attempt, error = %err, "Transient failure");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or_else(|| EngineError::transient(format!("{label}: retry budget exhausted"))))
    }
}

#[cfg(test)]
impl RetryPolicy {
    /// Tight policy for tests: immediate retries, no jitter, no pacing.
    pub(crate) fn fast() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            jitter: 0.0,
            min_call_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            max_delay: Duration::from_millis(4),
            ..RetryPolicy::fast()
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(EngineError::transient("flaky"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = fast_policy()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::permanent("invalid ticker")) }
            })
            .await;
        assert!(matches!(result, Err(EngineError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_last_transient() {
        let result: EngineResult<()> = fast_policy()
            .run("test", || async { Err(EngineError::transient("timeout")) })
            .await;
        assert!(matches!(result, Err(EngineError::Transient { .. })));
    }

    #[tokio::test]
    async fn successive_calls_are_spaced_by_min_interval() {
        let policy = RetryPolicy {
            min_call_interval: Duration::from_millis(50),
            ..RetryPolicy::fast()
        };

        let started = Instant::now();
        policy
            .run("first", || async { Ok::<_, EngineError>(1) })
            .await
            .unwrap();
        policy
            .run("second", || async { Ok::<_, EngineError>(2) })
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }
}
