//! Poll-until-state engine.
//!
//! Observes a remote resource through a caller-supplied fetch function until
//! it reaches a terminal state. The engine knows nothing about the resource:
//! instances and images are both polled through it with different fetch
//! functions and state vocabularies.
//!
//! Per iteration:
//!
//! ```text
//!   fetch ──► state ∈ waiting   ──► sleep(interval), loop      (WAITING)
//!         ├─► state == terminal ──► Ok                          (CONVERGED)
//!         ├─► any other state   ──► UnexpectedState             (FAILED)
//!         └─► fetch error       ──► Fetch                       (FAILED)
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::context::{CallContext, Interrupted};

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What to poll for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    /// Resource being observed, for fetches and diagnostics.
    pub resource_id: String,

    /// States that mean "still in progress".
    pub waiting_states: Vec<String>,

    /// The single state that means "done".
    pub terminal_state: String,

    /// Iteration cap; 0 means unlimited.
    pub max_iterations: u32,

    /// Sleep between polls.
    pub interval: Duration,
}

impl PollTarget {
    /// Poll `resource_id` until it reports `terminal_state`.
    pub fn new(resource_id: impl Into<String>, terminal_state: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            waiting_states: Vec::new(),
            terminal_state: terminal_state.into(),
            max_iterations: 0,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the states treated as in progress.
    #[must_use]
    pub fn waiting<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.waiting_states = states.into_iter().map(Into::into).collect();
        self
    }

    /// Cap the number of fetches; 0 means unlimited.
    #[must_use]
    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the sleep between polls.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn is_waiting(&self, state: &str) -> bool {
        self.waiting_states.iter().any(|s| s == state)
    }
}

/// Successful convergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// The terminal state observed.
    pub state: String,

    /// Number of fetches performed, the converging one included.
    pub iterations: u32,
}

/// Why a poll loop failed.
#[derive(Debug, Error)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    /// The resource reported a state outside the declared vocabulary.
    #[error(
        "unexpected state {observed:?} for {resource_id}, expecting a waiting state {waiting:?} or terminal state {terminal:?}"
    )]
    UnexpectedState {
        resource_id: String,
        observed: String,
        waiting: Vec<String>,
        terminal: String,
    },

    /// The iteration cap was reached before convergence.
    #[error(
        "maximum number of polls ({iterations}) exceeded; {resource_id} did not reach state {terminal:?} (last seen {last_state:?})"
    )]
    Timeout {
        resource_id: String,
        iterations: u32,
        terminal: String,
        last_state: String,
    },

    /// Fetching the state failed.
    #[error("failed to fetch state of {resource_id}: {source}")]
    Fetch {
        resource_id: String,
        #[source]
        source: E,
    },

    /// The run was cancelled or hit its deadline between polls.
    #[error("waiting for {resource_id} interrupted: {reason}")]
    Interrupted {
        resource_id: String,
        reason: Interrupted,
    },
}

impl<E> PollError<E>
where
    E: std::error::Error + 'static,
{
    /// The resource the failed poll was observing.
    pub fn resource_id(&self) -> &str {
        match self {
            Self::UnexpectedState { resource_id, .. }
            | Self::Timeout { resource_id, .. }
            | Self::Fetch { resource_id, .. }
            | Self::Interrupted { resource_id, .. } => resource_id,
        }
    }
}

/// Poll `fetch` until the target's terminal state is observed.
///
/// `fetch` receives the resource id and returns its current state. It is
/// expected to apply its own retry policy; any error it returns ends the loop.
pub async fn poll_until<S, E, F, Fut>(
    ctx: &CallContext,
    target: &PollTarget,
    mut fetch: F,
) -> Result<PollOutcome, PollError<E>>
where
    S: fmt::Display,
    E: std::error::Error + 'static,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<S, E>>,
{
    let mut iterations: u32 = 0;

    loop {
        let state = fetch(target.resource_id.clone())
            .await
            .map_err(|source| PollError::Fetch {
                resource_id: target.resource_id.clone(),
                source,
            })?
            .to_string();
        iterations += 1;

        if state == target.terminal_state {
            info!(
                resource_id = %target.resource_id,
                state = %state,
                iterations,
                "Resource reached terminal state"
            );
            return Ok(PollOutcome { state, iterations });
        }

        if !target.is_waiting(&state) {
            return Err(PollError::UnexpectedState {
                resource_id: target.resource_id.clone(),
                observed: state,
                waiting: target.waiting_states.clone(),
                terminal: target.terminal_state.clone(),
            });
        }

        if target.max_iterations != 0 && iterations >= target.max_iterations {
            return Err(PollError::Timeout {
                resource_id: target.resource_id.clone(),
                iterations,
                terminal: target.terminal_state.clone(),
                last_state: state,
            });
        }

        debug!(
            resource_id = %target.resource_id,
            state = %state,
            iterations,
            interval_ms = target.interval.as_millis() as u64,
            "Resource still in progress"
        );

        ctx.sleep(target.interval)
            .await
            .map_err(|reason| PollError::Interrupted {
                resource_id: target.resource_id.clone(),
                reason,
            })?;
    }
}
