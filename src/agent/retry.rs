//! Exponential backoff with jitter.
//!
//! [`with_retry`] re-runs an async operation until it succeeds or the
//! retry budget is spent. [`with_retry_if`] additionally consults a
//! predicate and gives up immediately on errors it deems permanent.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Default additional attempts after the first failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
/// Default ceiling on a single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
/// Fraction of the computed delay added at most as jitter.
const JITTER_FRACTION: f64 = 0.2;

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on any single delay (before jitter).
    pub max_delay: Duration,
    /// Add up to 20% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryOptions {
    /// No retries at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before retry `attempt` (1-based), without jitter:
    /// `min(max_delay, base_delay * 2^(attempt-1))`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before retry `attempt`, with jitter applied when enabled.
    ///
    /// The result lies in `[d, d * 1.2)` where `d` is [`Self::backoff_delay`].
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let fraction: f64 = rand::rng().random_range(0.0..JITTER_FRACTION);
        delay + delay.mul_f64(fraction)
    }
}

/// Runs `op`, retrying every failure up to `options.max_retries` times.
///
/// # Errors
///
/// Returns the last error once all attempts have failed.
pub async fn with_retry<T, E, F, Fut>(op: F, options: &RetryOptions) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    with_retry_if(op, options, |_| true).await
}

/// Runs `op`, retrying failures for which `should_retry` returns true.
///
/// A failure the predicate rejects is returned immediately.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once all
/// attempts have failed.
pub async fn with_retry_if<T, E, F, Fut, P>(
    mut op: F,
    options: &RetryOptions,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !should_retry(&err) || attempt >= options.max_retries {
                    return Err(err);
                }
                attempt += 1;
                let delay = options.delay_for(attempt);
                debug!(
                    attempt,
                    max_retries = options.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Classifies an error message as transient.
///
/// Matches timeouts, rate limiting (429), service unavailable (503),
/// generic network failures and low-level connection resets.
#[must_use]
pub fn is_retryable_message(message: &str) -> bool {
    const MARKERS: &[&str] = &[
        "timeout",
        "timed out",
        "rate limit",
        "429",
        "503",
        "network",
        "econnreset",
        "connection reset",
        "socket hang up",
    ];
    let lower = message.to_lowercase();
    MARKERS.iter().any(|marker| lower.contains(marker))
}
