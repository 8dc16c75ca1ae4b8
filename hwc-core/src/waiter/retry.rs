//! Retry classification and bounded resubmission
//!
//! Some submissions are rejected only because a prerequisite resource is itself in the
//! middle of a transition (CCE answers HTTP 403 for node pool changes while its cluster is
//! upgrading). Those submissions are retried, but only after explicitly waiting for the
//! prerequisite to settle, and never more than the policy allows.

use std::future::Future;
use std::time::Duration;

use log::{error, warn};
use tokio::time::Instant;

use super::error::{ApiError, WaitError};

/// Whether a failed submission should be attempted again
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Transient rejection; resubmit once the prerequisite is ready
    Retry(ApiError),
    /// Fatal; surface the original error
    Abort(ApiError),
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry(_))
    }

    pub fn into_error(self) -> ApiError {
        match self {
            RetryDecision::Retry(err) | RetryDecision::Abort(err) => err,
        }
    }
}

/// Decides whether a submission error is worth retrying
pub trait RetryClassifier {
    fn classify(&self, err: ApiError) -> RetryDecision;
}

/// Retries HTTP 403, which the API returns while a parent resource is transitioning
#[derive(Debug, Clone, Copy, Default)]
pub struct ForbiddenWhileTransitioning;

impl RetryClassifier for ForbiddenWhileTransitioning {
    fn classify(&self, err: ApiError) -> RetryDecision {
        if err.is_forbidden() {
            RetryDecision::Retry(err)
        } else {
            RetryDecision::Abort(err)
        }
    }
}

impl<F> RetryClassifier for F
where
    F: Fn(&ApiError) -> bool,
{
    fn classify(&self, err: ApiError) -> RetryDecision {
        if self(&err) {
            RetryDecision::Retry(err)
        } else {
            RetryDecision::Abort(err)
        }
    }
}

/// Budget for resubmitting a transiently rejected operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total submissions allowed, including the first one
    pub max_attempts: u32,
    /// Overall time allowed for submissions plus the waits between them
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            timeout: Duration::from_secs(20 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, timeout: Duration) -> Self {
        Self {
            max_attempts,
            timeout,
        }
    }
}

/// Submit an operation, resubmitting on retryable errors after `gate` completes
///
/// `gate` is the prerequisite's own wait (usually a [`wait_for_state`] call); a failing gate
/// aborts the retry loop with its error. Submissions and gates both count against
/// `policy.timeout`.
///
/// [`wait_for_state`]: super::refresh::wait_for_state
pub async fn submit_with_retry<H, C, S, SFut, G, GFut>(
    operation: &str,
    policy: &RetryPolicy,
    classifier: &C,
    mut submit: S,
    mut gate: G,
) -> Result<H, WaitError>
where
    C: RetryClassifier + ?Sized,
    S: FnMut() -> SFut,
    SFut: Future<Output = Result<H, ApiError>>,
    G: FnMut() -> GFut,
    GFut: Future<Output = Result<(), WaitError>>,
{
    if policy.max_attempts == 0 {
        return Err(WaitError::InvalidSpec(
            "retry policy needs at least one attempt".to_string(),
        ));
    }

    let start = Instant::now();
    let deadline = start + policy.timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let err = match tokio::time::timeout_at(deadline, submit()).await {
            Ok(Ok(handle)) => return Ok(handle),
            Ok(Err(err)) => err,
            Err(_) => {
                error!(
                    "{} attempt {} did not complete within the retry budget of {:?}",
                    operation, attempts, policy.timeout
                );
                return Err(WaitError::RetryExhausted {
                    attempts,
                    elapsed: start.elapsed(),
                    source: ApiError::new(format!(
                        "{} did not complete within {:?}",
                        operation, policy.timeout
                    )),
                });
            }
        };

        let err = match classifier.classify(err) {
            RetryDecision::Abort(err) => {
                error!("{} failed after {} attempt(s): {}", operation, attempts, err);
                return Err(WaitError::Submit {
                    attempts,
                    source: err,
                });
            }
            RetryDecision::Retry(err) => err,
        };

        if attempts >= policy.max_attempts || Instant::now() >= deadline {
            error!(
                "{} still rejected after {} attempt(s): {}",
                operation, attempts, err
            );
            return Err(WaitError::RetryExhausted {
                attempts,
                elapsed: start.elapsed(),
                source: err,
            });
        }

        warn!(
            "{} rejected ({}), waiting for prerequisite before attempt {}/{}",
            operation,
            err,
            attempts + 1,
            policy.max_attempts
        );

        match tokio::time::timeout_at(deadline, gate()).await {
            Ok(Ok(())) => {}
            Ok(Err(gate_err)) => return Err(gate_err),
            Err(_) => {
                error!(
                    "{} retry budget of {:?} ran out while waiting for prerequisite",
                    operation, policy.timeout
                );
                return Err(WaitError::RetryExhausted {
                    attempts,
                    elapsed: start.elapsed(),
                    source: err,
                });
            }
        }
    }
}
