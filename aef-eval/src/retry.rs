//! Backoff policy for the scoring backend

use aef_core::{EvalError, Result};
use std::future::Future;
use std::time::Duration;

/// How many times to retry and how long to wait in between.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(10))
    }
}

impl RetryConfig {
    /// Doubling backoff starting at `initial_delay`, capped at `max_delay`.
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self { max_retries, initial_delay, max_delay, multiplier: 2.0 }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// The waits before each retry, `max_retries` of them.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay.min(self.max_delay),
            remaining: self.max_retries,
            max_delay: self.max_delay,
            multiplier: self.multiplier.max(1.0),
        }
    }
}

/// Iterator over retry delays
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    remaining: u32,
    max_delay: Duration,
    multiplier: f64,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next;
        self.next = Duration::from_secs_f64(current.as_secs_f64() * self.multiplier).min(self.max_delay);
        Some(current)
    }
}

/// What an HTTP status means for a retry loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 401/403; retrying with the same credentials cannot help
    Auth,
    /// Throttling, timeouts and server-side failures
    Transient,
    Permanent,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 | 403 => StatusClass::Auth,
        408 | 429 | 500 | 502 | 503 | 504 => StatusClass::Transient,
        _ => StatusClass::Permanent,
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or the backoff runs out. The last error is returned.
pub async fn with_backoff<T, Op, Fut>(
    config: &RetryConfig,
    should_retry: impl Fn(&EvalError) -> bool,
    mut operation: Op,
) -> Result<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delays = config.backoff();
    let mut retries = 0u32;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if !should_retry(&error) {
            return Err(error);
        }
        let Some(delay) = delays.next() else {
            return Err(error);
        };

        retries += 1;
        aef_telemetry::warn!(
            retry = retries,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying scoring request"
        );
        tokio::time::sleep(delay).await;
    }
}
