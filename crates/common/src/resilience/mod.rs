//! Retry policy applied at every collaborator call site
//!
//! Exponential backoff between attempts, a hard cap on total attempts,
//! and only transient failures are retried.

use crate::config::RetryConfig;
use crate::errors::CollaboratorError;
use crate::metrics;
use backoff::{future::retry, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
        }
    }

    /// Policy without waits between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    ///
    /// The error returned after exhaustion is the last one observed.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, CollaboratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build();

        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        retry(schedule, || {
            attempt += 1;
            let current = attempt;
            let call = op();
            async move {
                match call.await {
                    Ok(value) => Ok(value),
                    Err(err) if err.is_transient() && current < max_attempts => {
                        warn!(
                            operation,
                            attempt = current,
                            max_attempts,
                            error = %err,
                            "Collaborator call failed, retrying"
                        );
                        metrics::record_retry(operation);
                        Err(backoff::Error::transient(err))
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            }
        })
        .await
    }
}
