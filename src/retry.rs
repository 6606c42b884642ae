//! Read-after-write reconciliation.
//!
//! A mined transaction does not mean the next view call observes its effect:
//! the node serving reads may lag the one that accepted the write. Every
//! mutation whose consequence must be visible before the caller proceeds runs
//! through [`mutate_and_confirm`], which submits once and then polls a
//! post-condition within a fixed budget.

use std::future::Future;
use std::time::Duration;

use crate::error::{ConvergenceError, Error};

/// Verification budget for one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of times the post-condition is checked.
    pub max_attempts: u32,
    /// Pause before each check.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            crate::settings::DEFAULT_CONFIRM_MAX_ATTEMPTS,
            Duration::from_millis(crate::settings::DEFAULT_CONFIRM_DELAY_MS),
        )
    }
}

/// Run `mutate` once, then poll `verify` until it reports `true`.
///
/// A failing `mutate` propagates immediately and is never resubmitted. A
/// `verify` call that errors counts as an attempt that did not converge.
/// When the budget is spent the caller gets a [`ConvergenceError`] naming
/// `expectation`; the mutation is never reported as a success without the
/// post-condition having been observed.
pub async fn mutate_and_confirm<T, E, M, MFut, V, VFut>(
    mutate: M,
    mut verify: V,
    policy: RetryPolicy,
    expectation: &str,
) -> Result<T, Error>
where
    E: Into<Error>,
    M: FnOnce() -> MFut,
    MFut: Future<Output = Result<T, E>>,
    V: FnMut() -> VFut,
    VFut: Future<Output = Result<bool, E>>,
{
    let outcome = mutate().await.map_err(Into::into)?;

    for attempt in 1..=policy.max_attempts {
        if !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
        match verify().await {
            Ok(true) => {
                tracing::debug!(expectation, attempt, "post-condition observed");
                return Ok(outcome);
            }
            Ok(false) => {
                tracing::debug!(
                    expectation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "post-condition not yet observed"
                );
            }
            Err(e) => {
                let error: Error = e.into();
                tracing::debug!(expectation, attempt, error = %error, "verification check failed");
            }
        }
    }

    tracing::warn!(
        expectation,
        attempts = policy.max_attempts,
        "post-condition never observed; reporting failure"
    );
    Err(ConvergenceError {
        expectation: expectation.to_string(),
        attempts: policy.max_attempts,
    }
    .into())
}
