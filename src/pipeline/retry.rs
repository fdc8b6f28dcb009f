// src/pipeline/retry.rs
//! Exponential backoff with jitter for every outbound call.
//!
//! `backoff(k) = 2^(k-1) * base * (1 + jitter)`, jitter uniform in [-0.1, 0.1].
//! Operations report failure as `Err`; a panicking attempt is caught and
//! counted as a failed attempt as well.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use rand::Rng;

pub const JITTER_RATIO: f64 = 0.1;

/// Why one attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    Failed(E),
    Panicked(String),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Failed(e) => write!(f, "{e}"),
            AttemptError::Panicked(msg) => write!(f, "attempt panicked: {msg}"),
        }
    }
}

/// Final outcome of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// `Ok` from the first successful attempt, or the last failure.
    pub result: Result<T, AttemptError<E>>,
    pub attempt_count: u32,
    pub total_duration_ms: u64,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct BackoffRetrier {
    base_delay: Duration,
}

impl BackoffRetrier {
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay after failed attempt `attempt` (1-based), with fresh jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(-JITTER_RATIO..=JITTER_RATIO);
        backoff_with_jitter(self.base_delay, attempt, jitter)
    }

    /// Retry on every failure, up to `max_attempts`.
    pub async fn execute<T, E, F, Fut>(&self, op: F, max_attempts: u32) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_with_policy(op, max_attempts, |_| true).await
    }

    /// Like [`execute`](Self::execute) but stops early when `should_retry`
    /// rejects a failure. Panics are always retried.
    pub async fn execute_with_policy<T, E, F, Fut, P>(
        &self,
        mut op: F,
        max_attempts: u32,
        should_retry: P,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        let attempts = max_attempts.max(1);
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            // building the future can panic too, so call `op` inside the guard
            let res = match AssertUnwindSafe(async { op().await }).catch_unwind().await {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(AttemptError::Failed(e)),
                Err(panic) => Err(AttemptError::Panicked(panic_message(panic.as_ref()))),
            };

            let err = match res {
                Ok(v) => {
                    return RetryOutcome {
                        result: Ok(v),
                        attempt_count: attempt,
                        total_duration_ms: elapsed_ms(started),
                    }
                }
                Err(e) => e,
            };

            let retryable = match &err {
                AttemptError::Failed(e) => should_retry(e),
                AttemptError::Panicked(_) => true,
            };
            if !retryable || attempt >= attempts {
                return RetryOutcome {
                    result: Err(err),
                    attempt_count: attempt,
                    total_duration_ms: elapsed_ms(started),
                };
            }

            let delay = self.backoff(attempt);
            tracing::debug!(
                target: "retry",
                attempt,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for BackoffRetrier {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

/// Deterministic core of the backoff formula; `jitter` is clamped to ±10%.
/// Saturates at `Duration::MAX` instead of overflowing.
pub fn backoff_with_jitter(base: Duration, attempt: u32, jitter: f64) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    let factor = 2f64.powi(exp as i32) * (1.0 + jitter.clamp(-JITTER_RATIO, JITTER_RATIO));
    Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
