//! Retry logic.
//!
//! # Responsibilities
//! - Retry only what the failure taxonomy marked retryable
//! - Execute retries with exponential backoff + jitter
//! - Enforce retry budget (retries as a share of requests)
//!
//! # Design Decisions
//! - The retryable flag is read, never recomputed
//! - Jittered backoff prevents thundering herd
//! - Retry budget prevents retry storms under load

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::backoff::Backoff;
use crate::config::RetryConfig;
use crate::failure::ClassifiedError;

/// An error that knows whether the failed operation may be repeated.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for ClassifiedError {
    fn is_retryable(&self) -> bool {
        ClassifiedError::is_retryable(self)
    }
}

/// Caps retries to a share of all requests.
///
/// A reserve of `min_retries` is always available so a quiet client can
/// still retry.
#[derive(Debug)]
pub struct RetryBudget {
    ratio: f64,
    min_retries: u64,
    requests: AtomicU64,
    retries: AtomicU64,
}

impl RetryBudget {
    pub fn new(ratio: f32, min_retries: u64) -> Self {
        Self {
            ratio: f64::from(ratio),
            min_retries,
            requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// Record a first attempt.
    pub fn deposit(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Take one retry from the budget, if any is left.
    pub fn try_withdraw(&self) -> bool {
        let requests = self.requests.load(Ordering::Relaxed) as f64;
        let allowed = self.min_retries + (requests * self.ratio) as u64;
        self.retries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < allowed).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

/// Retry policy applied by callers.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    max_attempts: u32,
    backoff: Backoff,
    budget: Arc<RetryBudget>,
}

impl RetryPolicy {
    const MIN_RETRIES: u64 = 10;

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::from_config(config),
            budget: Arc::new(RetryBudget::new(config.budget_ratio, Self::MIN_RETRIES)),
        }
    }

    /// Policy that never retries.
    pub fn disabled() -> Self {
        Self::from_config(&RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out. `op` receives the 1-based attempt number.
    pub async fn execute<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        self.budget.deposit();
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.enabled || !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }
            if !self.budget.try_withdraw() {
                tracing::warn!(attempt, error = %err, "Retry budget exhausted");
                return Err(err);
            }

            let delay = self.backoff.delay(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
