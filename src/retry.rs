//! Bounded retry with exponential backoff.
//!
//! Every call that leaves the process (chat completions, image generation,
//! image downloads, Telegram, IndexNow) is wrapped in a [`Backoff`] so that
//! transient failures are absorbed locally and only the final error of an
//! exhausted budget reaches the caller.
//!
//! # Delay schedule
//!
//! ```text
//! attempt 1 fails -> sleep initial_delay
//! attempt 2 fails -> sleep initial_delay * factor
//! attempt n fails -> sleep initial_delay * factor^(n-1)
//! attempt max_attempts fails -> return that error
//! ```
//!
//! The schedule is deterministic unless [`Backoff::with_jitter`] is used.

use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

/// Retry policy: attempt ceiling, first delay and growth factor.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    max_attempts: usize,
    initial_delay: Duration,
    factor: f64,
    jitter: Option<Duration>,
}

impl Default for Backoff {
    /// Three attempts, sleeping 1s then 2s.
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0)
    }
}

impl Backoff {
    /// Create a policy.
    ///
    /// `max_attempts` is clamped to at least 1 and `factor` to at least 1.0,
    /// so a policy never shrinks its delay and always runs the operation once.
    pub fn new(max_attempts: usize, initial_delay: Duration, factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            factor: if factor.is_finite() { factor.max(1.0) } else { 1.0 },
            jitter: None,
        }
    }

    /// Add up to `max` of random delay on top of every scheduled sleep.
    pub fn with_jitter(mut self, max: Duration) -> Self {
        self.jitter = Some(max);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// The sleeps taken between attempts when every attempt fails, jitter excluded.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut current = self.initial_delay;
        (1..self.max_attempts).map(move |_| {
            let this = current;
            current = Duration::try_from_secs_f64(current.as_secs_f64() * self.factor)
                .unwrap_or(Duration::MAX);
            this
        })
    }

    fn jittered(&self, delay: Duration) -> Duration {
        match self.jitter {
            Some(max) if !max.is_zero() => {
                let extra_ms: u64 = rng().random_range(0..=max.as_millis() as u64);
                delay.saturating_add(Duration::from_millis(extra_ms))
            }
            _ => delay,
        }
    }

    /// Run `operation` until it succeeds or the attempt ceiling is reached.
    ///
    /// Returns the first `Ok` without further attempts. When every attempt
    /// fails, the error of the last attempt is returned untouched; earlier
    /// errors are logged and dropped.
    pub async fn retry<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let total_t0 = Instant::now();
        let mut delays = self.delays();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let Some(delay) = delays.next() else {
                        error!(
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            error = %e,
                            "all attempts failed"
                        );
                        return Err(e);
                    };

                    let delay = self.jittered(delay);
                    warn!(
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                        ?delay,
                        error = %e,
                        "attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use tokio::time::Instant as TokioInstant;

    #[test]
    fn test_default_schedule() {
        let delays: Vec<_> = Backoff::default().delays().collect();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn test_new_clamps_degenerate_inputs() {
        let backoff = Backoff::new(0, Duration::from_secs(1), 0.5);
        assert_eq!(backoff.max_attempts(), 1);
        assert_eq!(backoff.delays().count(), 0);

        let flat: Vec<_> = Backoff::new(3, Duration::from_secs(2), 0.1).delays().collect();
        assert_eq!(flat, vec![Duration::from_secs(2), Duration::from_secs(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_kth_attempt_stops_retrying() {
        let calls = Cell::new(0usize);
        let backoff = Backoff::new(5, Duration::from_secs(1), 2.0);

        let result: Result<&str, String> = backoff
            .retry(|| {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 { Err(format!("failure {n}")) } else { Ok("done") }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_never_sleeps() {
        let start = TokioInstant::now();
        let result: Result<u32, String> = Backoff::default().retry(|| async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_sleeps_one_then_two_seconds_and_returns_last_error() {
        let calls = Cell::new(0usize);
        let stamps = RefCell::new(Vec::new());
        let backoff = Backoff::new(3, Duration::from_secs(1), 2.0);

        let result: Result<(), String> = backoff
            .retry(|| {
                calls.set(calls.get() + 1);
                stamps.borrow_mut().push(TokioInstant::now());
                let n = calls.get();
                async move { Err(format!("failure {n}")) }
            })
            .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.get(), 3);

        let stamps = stamps.into_inner();
        let first_gap = stamps[1] - stamps[0];
        let second_gap = stamps[2] - stamps[1];
        assert!(first_gap >= Duration::from_secs(1) && first_gap < Duration::from_millis(1100));
        assert!(second_gap >= Duration::from_secs(2) && second_gap < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_fails_immediately() {
        let calls = Cell::new(0usize);
        let start = TokioInstant::now();

        let result: Result<(), &str> = Backoff::new(1, Duration::from_secs(1), 2.0)
            .retry(|| {
                calls.set(calls.get() + 1);
                async { Err("boom") }
            })
            .await;

        assert_eq!(result, Err("boom"));
        assert_eq!(calls.get(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_huge_factor_saturates_instead_of_overflowing() {
        let backoff = Backoff::new(4, Duration::from_secs(1), 1e300);
        let delays: Vec<Duration> = backoff.delays().collect();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::MAX, Duration::MAX]);
        assert_eq!(backoff.jittered(Duration::MAX), Duration::MAX);
        let jittered = backoff.with_jitter(Duration::from_millis(250));
        assert_eq!(jittered.jittered(Duration::MAX), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_factor_still_returns_the_error() {
        let calls = Cell::new(0usize);
        let result: Result<(), &str> = Backoff::new(2, Duration::from_secs(1), 1e300)
            .retry(|| {
                calls.set(calls.get() + 1);
                async { Err("x") }
            })
            .await;
        assert_eq!(result, Err("x"));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_only_adds_delay() {
        let stamps = RefCell::new(Vec::new());
        let backoff =
            Backoff::new(2, Duration::from_secs(1), 2.0).with_jitter(Duration::from_millis(250));

        let _: Result<(), &str> = backoff
            .retry(|| {
                stamps.borrow_mut().push(TokioInstant::now());
                async { Err("nope") }
            })
            .await;

        let stamps = stamps.into_inner();
        let gap = stamps[1] - stamps[0];
        assert!(gap >= Duration::from_secs(1));
        assert!(gap <= Duration::from_millis(1260));
    }
}
