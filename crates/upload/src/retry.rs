//! Retry policy shared by the simple and chunked uploaders.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;

/// Backoff curve and limits for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per operation, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for a computed delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Wall-clock budget for one operation, sleeps included.
    pub time_budget: Duration,
    /// Jitter as a fraction of the delay (0.25 = ±25%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            time_budget: Duration::from_secs(5 * 60),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.max_attempts == 0 {
            return Err(UploadError::Config("max attempts must be at least 1".into()));
        }
        if self.backoff_factor < 1.0 {
            return Err(UploadError::Config("backoff factor must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(UploadError::Config("jitter must be within [0, 1]".into()));
        }
        Ok(())
    }

    /// Computes the delay before retry number `attempt` (1-based).
    ///
    /// `initial * factor^(attempt-1)`, capped at `max_delay`, with jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(capped);
        }
        let offset: f64 = rand::thread_rng().gen_range(-1.0..1.0);
        let with_jitter = (capped + capped * self.jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }

    /// Starts tracking one operation.
    pub fn start(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            attempts: 0,
            retries: 0,
            started: Instant::now(),
        }
    }

    /// Runs `op` until it succeeds, fails permanently or exhausts the policy.
    ///
    /// `on_retry` sees the retry number, the delay about to be slept and the
    /// error that caused it. Returns the result and the number of retries.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut on_retry: impl FnMut(u32, Duration, &UploadError),
        mut op: F,
    ) -> (Result<T, UploadError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let mut backoff = self.start();
        loop {
            if cancel.is_cancelled() {
                return (Err(UploadError::Cancelled), backoff.retries());
            }
            let err = match op().await {
                Ok(value) => return (Ok(value), backoff.retries()),
                Err(err) => err,
            };
            let Some(delay) = backoff.next_delay(&err) else {
                return (Err(err), backoff.retries());
            };
            on_retry(backoff.retries(), delay, &err);
            if let Err(cancelled) = sleep_or_cancel(cancel, delay).await {
                return (Err(cancelled), backoff.retries());
            }
        }
    }
}

/// Per-operation retry bookkeeping.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
    retries: u32,
    started: Instant,
}

impl Backoff<'_> {
    /// Records a failed attempt and returns how long to wait before the next
    /// one, or `None` if the error should not be retried.
    pub fn next_delay(&mut self, err: &UploadError) -> Option<Duration> {
        if !err.is_transient() {
            return None;
        }
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = err
            .retry_after()
            .unwrap_or_else(|| self.policy.delay_for_attempt(self.attempts));
        if self.started.elapsed() + delay > self.policy.time_budget {
            return None;
        }
        self.retries += 1;
        Some(delay)
    }

    /// Starts a fresh attempt count and time budget after progress was made.
    ///
    /// The retry total keeps running.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.started = Instant::now();
    }

    /// Retries granted so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
pub async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> Result<(), UploadError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
