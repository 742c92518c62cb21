//! Retrying call executor.
//!
//! Every remote call goes through [`CallExecutor::execute`]: the call is
//! attempted, and on failure the [`BackoffPolicy`] decides whether to sleep
//! and try again. Sleeps and in-flight attempts are both abandoned when the
//! [`CallContext`] is interrupted.

use std::future::Future;

use thiserror::Error;
use tracing::{debug, warn};

use crate::backoff::{BackoffPolicy, ServiceStatus};
use crate::context::{CallContext, Interrupted};

/// Failure of a call after the executor is done with it.
#[derive(Debug, Error)]
pub enum CallError<E>
where
    E: std::error::Error + 'static,
{
    /// The call failed with an error the policy does not retry. The error is
    /// passed through unchanged.
    #[error("{operation} failed: {source}")]
    Failed {
        operation: &'static str,
        #[source]
        source: E,
    },

    /// Every allowed attempt failed with a retryable error.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        last: E,
    },

    /// The run was cancelled or timed out while the call was pending.
    #[error("{operation} interrupted after {attempts} attempts: {reason}")]
    Interrupted {
        operation: &'static str,
        attempts: u32,
        reason: Interrupted,
    },
}

impl<E> CallError<E>
where
    E: std::error::Error + 'static,
{
    /// Name of the remote operation that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Failed { operation, .. }
            | Self::Exhausted { operation, .. }
            | Self::Interrupted { operation, .. } => operation,
        }
    }

    /// The last service error observed, if the call reached the service.
    pub fn service_error(&self) -> Option<&E> {
        match self {
            Self::Failed { source, .. } => Some(source),
            Self::Exhausted { last, .. } => Some(last),
            Self::Interrupted { .. } => None,
        }
    }

    /// Returns true if the attempt ceiling was hit.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Returns true if the run was cancelled or hit its deadline.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

/// Wraps remote calls with the backoff policy.
#[derive(Debug, Clone, Default)]
pub struct CallExecutor {
    policy: BackoffPolicy,
}

impl CallExecutor {
    /// Create an executor around `policy`.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    /// The policy this executor consults.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds, fails permanently, or runs out of
    /// attempts.
    ///
    /// `call` is invoked once per attempt and must build a fresh request each
    /// time; anything that has to stay stable across attempts (such as a
    /// retry token) belongs outside the closure.
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, CallError<E>>
    where
        E: std::error::Error + ServiceStatus + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            let outcome = ctx
                .run(call())
                .await
                .map_err(|reason| CallError::Interrupted {
                    operation,
                    attempts: attempt,
                    reason,
                })?;
            attempt += 1;

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempts = attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            // Retry numbering starts at 0 for the first retry.
            let decision = self.policy.decide(attempt - 1, &error);
            if !decision.retry {
                return Err(CallError::Failed {
                    operation,
                    source: error,
                });
            }

            if attempt >= max_attempts {
                warn!(
                    operation,
                    attempts = attempt,
                    status = error.http_status(),
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(CallError::Exhausted {
                    operation,
                    attempts: attempt,
                    last: error,
                });
            }

            warn!(
                operation,
                attempt,
                status = error.http_status(),
                delay_ms = decision.delay.as_millis() as u64,
                error = %error,
                "Transient service error, backing off"
            );

            ctx.sleep(decision.delay)
                .await
                .map_err(|reason| CallError::Interrupted {
                    operation,
                    attempts: attempt,
                    reason,
                })?;
        }
    }
}
