//! Bounded retry with exponential backoff.
//!
//! The controller is an explicit loop: attempt numbers and delays are plain
//! values the caller can observe through [`RetryStep`], not recursion depth.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ConnectivityMonitor, TransferError};

/// Retry configuration for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay after the first failure
    pub base_delay: Duration,

    /// Cap for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Total attempts allowed, first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `min(base_delay * 2^(attempt-1), max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Every delay an item can wait through, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_retries).map(|attempt| self.delay_for(attempt)).collect()
    }
}

/// Observable progress of the retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStep {
    /// Attempt `number` is about to start
    Attempt { number: u32 },

    /// Attempt `attempt` failed; the next one starts after `delay`
    Backoff {
        attempt: u32,
        delay: Duration,
        error: String,
    },
}

/// How the retry loop ended
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
    Cancelled { attempts: u32 },
}

/// Drives one item's transfer attempts under a [`RetryPolicy`]
pub struct RetryController<'a> {
    policy: &'a RetryPolicy,
    connectivity: Option<&'a ConnectivityMonitor>,
    cancel: &'a CancellationToken,
}

impl<'a> RetryController<'a> {
    pub fn new(policy: &'a RetryPolicy, cancel: &'a CancellationToken) -> Self {
        Self {
            policy,
            connectivity: None,
            cancel,
        }
    }

    /// Hold attempts while `connectivity` reports offline
    pub fn gated_by(mut self, connectivity: &'a ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Run `attempt` until it succeeds, the budget runs out or the token fires.
    ///
    /// `observe` sees every attempt start and every scheduled backoff.
    pub async fn run<T, F, Fut, O>(&self, mut attempt: F, mut observe: O) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
        O: FnMut(RetryStep),
    {
        let mut attempts = 0u32;

        loop {
            if !self.wait_until_online().await {
                return RetryOutcome::Cancelled { attempts };
            }

            attempts += 1;
            observe(RetryStep::Attempt { number: attempts });

            let error = match attempt(attempts).await {
                Ok(value) => return RetryOutcome::Succeeded { value, attempts },
                Err(TransferError::Cancelled) => return RetryOutcome::Cancelled { attempts },
                Err(error) => error.to_string(),
            };

            if self.cancel.is_cancelled() {
                return RetryOutcome::Cancelled { attempts };
            }

            if attempts >= self.policy.max_attempts() {
                return RetryOutcome::Exhausted {
                    attempts,
                    last_error: error,
                };
            }

            let delay = self.policy.delay_for(attempts);
            warn!("Attempt {} failed, retrying in {:?}: {}", attempts, delay, error);
            observe(RetryStep::Backoff {
                attempt: attempts,
                delay,
                error,
            });

            tokio::select! {
                _ = self.cancel.cancelled() => return RetryOutcome::Cancelled { attempts },
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Returns false if cancelled while waiting
    async fn wait_until_online(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let Some(connectivity) = self.connectivity else {
            return true;
        };
        if connectivity.is_online() {
            return true;
        }

        debug!("Offline, holding next attempt until connectivity returns");
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = connectivity.wait_online() => !self.cancel.is_cancelled(),
        }
    }
}
