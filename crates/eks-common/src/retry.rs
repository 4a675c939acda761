//! Retry policy with exponential backoff and jitter.
//!
//! Every activity carries a [`RetryPolicy`]: a bounded attempt count, a fixed
//! backoff coefficient and a list of error kinds that must never be retried
//! (a stack that reached CREATE_FAILED will fail the same way again).
//!
//! # Example
//!
//! ```ignore
//! use eks_common::retry::{retry_with_policy, RetryPolicy};
//!
//! let stack = retry_with_policy(&RetryPolicy::default(), "describe_stack", |_attempt| async {
//!     api.describe_stack(&name).await
//! })
//! .await?;
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{Error, ErrorKind};

/// Retry configuration for an activity or a cloud call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first (0 = unbounded)
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_interval_ms: u64,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_coefficient: f64,
    /// Upper bound on the delay between attempts, in milliseconds
    pub max_interval_ms: u64,
    /// Error kinds that stop the policy immediately
    pub non_retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval_ms: 1_000,
            backoff_coefficient: 2.0,
            max_interval_ms: 60_000,
            non_retryable: vec![
                ErrorKind::Validation,
                ErrorKind::FinalStackFailure,
                ErrorKind::Cancelled,
            ],
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Default policy with a different attempt bound
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Whether `error`, returned by attempt number `attempt` (1-based), should
    /// be retried under this policy.
    pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        if self.max_attempts > 0 && attempt >= self.max_attempts {
            return false;
        }
        if self.non_retryable.contains(&error.kind()) {
            return false;
        }
        error.is_retryable()
    }

    /// Un-jittered delay after attempt number `attempt` (1-based) failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_interval_ms as f64 * self.backoff_coefficient.powi(exponent);
        Duration::from_millis(millis.min(self.max_interval_ms as f64) as u64)
    }
}

/// Execute an async operation under a retry policy.
///
/// The closure receives the 1-based attempt number. Stops on success, on an
/// error the policy refuses to retry, or when attempts are exhausted; the last
/// error is returned unchanged.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !policy.should_retry(&e, attempt) {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        kind = %e.kind(),
                        error = %e,
                        "Operation failed, not retrying"
                    );
                    return Err(e);
                }

                // Jitter: 0.5x to 1.5x of the delay
                let delay = policy.delay_after(attempt);
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;
            }
        }
    }
}
