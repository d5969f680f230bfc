//! Whole-transaction retry for lock contention.
//!
//! Collection rows are locked source first, then destination, so two
//! opposite-direction moves can deadlock. PostgreSQL aborts one of them with
//! `40P01`; a waiter that exceeds the pool's `lock_timeout` fails with
//! `55P03`. Both leave nothing behind once the transaction is dropped, so the
//! caller simply runs the transaction again.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use folio_core::{Error, Result};

/// Default number of re-runs after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry limits and exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Re-runs after the first attempt. 0 disables retrying.
    pub max_retries: u32,
    /// Delay before the first re-run; doubled for each further one.
    pub base_delay: Duration,
    /// Upper bound for a single delay (before jitter).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Defaults with `FOLIO_TX_MAX_RETRIES` applied.
    pub fn from_env() -> Result<Self> {
        let mut policy = Self::default();
        if let Ok(raw) = std::env::var("FOLIO_TX_MAX_RETRIES") {
            policy.max_retries = raw.trim().parse().map_err(|e| {
                Error::Config(format!("FOLIO_TX_MAX_RETRIES must be a number: {}", e))
            })?;
        }
        Ok(policy)
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Backoff before re-run number `retry` (0-based), without jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or
/// the policy's retries are used up.
///
/// Every call of `attempt` must open and commit its own transaction.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &'static str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match attempt().await {
            Err(e) if e.is_retryable() && retry < policy.max_retries => {
                let delay = policy.delay_for(retry);
                let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
                let delay = delay + Duration::from_millis(jitter_ms);
                warn!(
                    subsystem = "db",
                    component = "retry",
                    op,
                    attempt = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transaction hit lock contention, retrying"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    debug!(
                        subsystem = "db",
                        component = "retry",
                        op,
                        attempts = retry + 1,
                        "Retries exhausted"
                    );
                }
                return Err(e);
            }
            Ok(value) => return Ok(value),
        }
    }
}

/// Attempts made to insert a row with a fresh fractional key before giving
/// up with [`Error::Conflict`].
pub const MAX_KEY_ATTEMPTS: u32 = 5;

/// Re-run `attempt` when it fails on a unique violation.
///
/// Used by appends of collections, pins and stars: the next attempt opens a
/// new transaction, re-reads the neighbours (now including the row that won
/// the race) and derives a different key.
pub async fn with_key_retry<T, F, Fut>(op: &'static str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for n in 1..=MAX_KEY_ATTEMPTS {
        match attempt().await {
            Err(e) if e.is_unique_violation() => {
                debug!(
                    subsystem = "db",
                    component = "retry",
                    op,
                    attempt = n,
                    "Fractional key collided, recomputing"
                );
            }
            other => return other,
        }
    }
    Err(Error::Conflict(format!(
        "{}: no free index after {} attempts",
        op, MAX_KEY_ATTEMPTS
    )))
}
