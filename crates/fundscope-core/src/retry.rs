//! Attempt budgets and backoff between attempts.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::SourceError;

/// Request timeout, rate limiting and server-side failures. Every other 4xx
/// is final.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// Wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed { delay: Duration },
    /// `step`, `2 * step`, `3 * step`, ... up to `max`.
    Linear { step: Duration, max: Duration },
    /// `initial * multiplier^n` up to `max`. With `jitter`, the wait is drawn
    /// uniformly from half to one and a half times that value.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max: Duration::from_secs(4),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Wait after failed attempt `failed` (0-based).
    pub fn delay(self, failed: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Linear { step, max } => step.saturating_mul(failed.saturating_add(1)).min(max),
            Self::Exponential {
                initial,
                multiplier,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(failed).unwrap_or(i32::MAX);
                let nominal =
                    (initial.as_secs_f64() * multiplier.powi(exponent)).min(max.as_secs_f64());
                let spread = if jitter { 0.5 + fastrand::f64() } else { 1.0 };
                Duration::from_secs_f64((nominal * spread).max(0.0))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts including the first one; never below 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential(3)
    }
}

impl RetryConfig {
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::default(),
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed { delay },
        }
    }

    pub fn single_attempt() -> Self {
        Self::fixed(Duration::ZERO, 1)
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.max_attempts > 1 && is_transient_status(status)
    }

    pub fn delay_for_attempt(&self, failed: u32) -> Duration {
        self.backoff.delay(failed)
    }

    /// Drives `operation` (given the 0-based attempt number) until it
    /// succeeds, fails permanently, or the budget is spent. The last error
    /// is returned unchanged.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, SourceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let budget = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.retryable() || attempt + 1 >= budget {
                return Err(err);
            }

            let wait = self.delay_for_attempt(attempt);
            warn!(
                operation = label,
                attempt = attempt + 1,
                max_attempts = budget,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                code = err.code(),
                error = %err,
                "transient failure, backing off"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn transient_statuses() {
        for status in [408, 429, 500, 502, 503, 504, 599] {
            assert!(is_transient_status(status), "{status}");
        }
        for status in [200, 301, 400, 401, 403, 404, 410] {
            assert!(!is_transient_status(status), "{status}");
        }
        assert!(!RetryConfig::single_attempt().should_retry_status(503));
    }

    #[test]
    fn linear_backoff_grows_by_step_until_capped() {
        let backoff = Backoff::Linear {
            step: Duration::from_secs(2),
            max: Duration::from_secs(5),
        };
        let waits: Vec<_> = (0..4).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(waits, vec![2, 4, 5, 5]);
    }

    #[test]
    fn exponential_backoff_doubles_then_caps() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(250),
            multiplier: 2.0,
            max: Duration::from_secs(2),
            jitter: false,
        };
        let waits: Vec<_> = (0..6).map(|n| backoff.delay(n).as_millis()).collect();
        assert_eq!(waits, vec![250, 500, 1000, 2000, 2000, 2000]);
    }

    #[test]
    fn jittered_waits_stay_within_half_and_one_and_a_half() {
        let backoff = Backoff::default();
        for failed in 0..4 {
            let nominal = (500.0 * 2_f64.powi(failed as i32)).min(4000.0);
            for _ in 0..20 {
                let wait = backoff.delay(failed).as_secs_f64() * 1000.0;
                let within = wait >= nominal * 0.5 - 1.0 && wait <= nominal * 1.5 + 1.0;
                assert!(within, "{failed}: {wait}");
            }
        }
    }

    #[tokio::test]
    async fn transient_failures_use_the_whole_budget() {
        let retry = RetryConfig::fixed(Duration::ZERO, 3);
        let calls = AtomicU32::new(0);

        let result: Result<(), SourceError> = retry
            .run("sec", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::unavailable("503")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let retry = RetryConfig::fixed(Duration::ZERO, 3);
        let calls = AtomicU32::new(0);

        let result: Result<(), SourceError> = retry
            .run("bdif", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::not_found("404")) }
            })
            .await;

        assert_eq!(result.map_err(|err| err.code()), Err("source.not_found"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_on_a_later_attempt() {
        let retry = RetryConfig::fixed(Duration::ZERO, 3);

        let result = retry
            .run("oam", |attempt| async move {
                match attempt {
                    0 | 1 => Err(SourceError::rate_limited("429")),
                    n => Ok(n),
                }
            })
            .await;

        assert_eq!(result, Ok(2));
    }
}
