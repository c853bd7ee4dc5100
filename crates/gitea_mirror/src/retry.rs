//! Bounded, deterministic retry for item operations.
//!
//! [`RetryPolicy`] yields exactly `max_retries` delays, so an operation that
//! keeps failing runs `max_retries + 1` times. There is no jitter: a given
//! policy always waits the same amounts.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{BackoffBuilder, Retryable};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Every wait is `retry_delay`.
    Fixed,
    /// The wait before retry `k` is `retry_delay * k`.
    #[default]
    Linear,
}

impl std::fmt::Display for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backoff::Fixed => write!(f, "fixed"),
            Backoff::Linear => write!(f, "linear"),
        }
    }
}

impl std::str::FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed),
            "linear" => Ok(Backoff::Linear),
            other => Err(format!("unknown backoff: {other} (expected fixed or linear)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        )
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            backoff: Backoff::default(),
        }
    }

    /// A policy that runs the operation once.
    #[must_use]
    pub fn no_retries() -> Self {
        Self::new(0, Duration::ZERO)
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.retry_delay,
            Backoff::Linear => self.retry_delay.saturating_mul(retry.max(1)),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    #[must_use]
    pub fn into_backoff(self) -> PolicyBackoff {
        PolicyBackoff { policy: self }
    }
}

/// [`BackoffBuilder`] for a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct PolicyBackoff {
    policy: RetryPolicy,
}

impl BackoffBuilder for PolicyBackoff {
    type Backoff = PolicyDelays;

    fn build(self) -> Self::Backoff {
        PolicyDelays {
            policy: self.policy,
            issued: 0,
        }
    }
}

/// The finite delay sequence of one retry loop.
#[derive(Debug)]
pub struct PolicyDelays {
    policy: RetryPolicy,
    issued: u32,
}

impl Iterator for PolicyDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.issued >= self.policy.max_retries {
            return None;
        }
        self.issued += 1;
        Some(self.policy.delay_for(self.issued))
    }
}

/// Result of running an operation under a policy.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Attempts made, including the first.
    pub attempts: u32,
}

/// Run `operation` under `policy`.
///
/// `on_retry(error, attempt, delay)` is called before each wait, with the
/// 1-based number of the attempt that just failed. Errors for which
/// `retry_if` returns `false` end the loop immediately.
pub async fn run_with_policy<T, E, F, Fut, OnRetry, RetryIf>(
    policy: &RetryPolicy,
    mut operation: F,
    on_retry: OnRetry,
    retry_if: RetryIf,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    OnRetry: Fn(&E, u32, Duration),
    RetryIf: Fn(&E) -> bool,
{
    let attempt = AtomicU32::new(0);

    let attempt_op = || {
        attempt.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    let result = attempt_op
        .retry(policy.clone().into_backoff())
        .notify(|err: &E, delay: Duration| {
            let failed_attempt = attempt.load(Ordering::SeqCst);
            tracing::debug!(
                attempt = failed_attempt,
                max_attempts = policy.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Attempt failed, retrying"
            );
            on_retry(err, failed_attempt, delay);
        })
        .when(|err: &E| retry_if(err))
        .await;

    RetryOutcome {
        result,
        attempts: attempt.load(Ordering::SeqCst),
    }
}
