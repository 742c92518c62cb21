//! Resilience primitives for talking to a remote control plane.
//!
//! This library provides the pieces every remote interaction in imagesmith
//! is built from:
//!
//! - **Backoff policy**: decides whether a failed call is transient and how
//!   long to wait before trying again.
//! - **Call executor**: wraps any async call with the backoff policy and an
//!   attempt ceiling.
//! - **Poll engine**: drives a resource-agnostic wait loop until a fetched
//!   state converges, fails, or runs out of iterations.
//! - **Call context**: the cancellation signal and deadline threaded through
//!   every call and every sleep.
//!
//! # Invariants
//!
//! - The policy is stateless; the same input always yields the same
//!   retry/no-retry verdict
//! - A non-retryable error is surfaced after exactly one attempt
//! - Sleeping is the only suspension point besides the call itself, and it
//!   always yields to cancellation

mod backoff;
mod context;
mod poll;
mod retry;

pub use backoff::{
    BackoffPolicy, RetryDecision, ServiceStatus, DEFAULT_MAX_ATTEMPTS, INTERNAL_SERVER_ERROR,
    SERVICE_UNAVAILABLE, TOO_MANY_REQUESTS,
};
pub use context::{CallContext, Interrupted};
pub use poll::{poll_until, PollError, PollOutcome, PollTarget, DEFAULT_POLL_INTERVAL};
pub use retry::{CallError, CallExecutor};
