//! Cancellable execution context threaded through every remote call and wait.
//!
//! A run is interrupted either by the shutdown signal (a `watch` channel
//! flipped to `true`) or by an overall deadline. Both backoff sleeps and poll
//! sleeps go through [`CallContext::sleep`], so an interruption abandons the
//! current wait immediately.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context stopped a wait or call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    /// The shutdown signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The run's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Execution context for one orchestration run.
///
/// Cheap to clone; clones observe the same signal and deadline.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    shutdown: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context cancelled when `shutdown` becomes `true`.
    pub fn with_shutdown(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            shutdown: Some(shutdown),
            deadline: None,
        }
    }

    /// Returns a copy of this context that also expires after `timeout`.
    ///
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };
        Self {
            shutdown: self.shutdown.clone(),
            deadline: Some(deadline),
        }
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails fast if the context is already interrupted.
    pub fn check(&self) -> Result<(), Interrupted> {
        if let Some(shutdown) = &self.shutdown {
            if *shutdown.borrow() {
                return Err(Interrupted::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Interrupted::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Resolves once the context is interrupted. Never resolves for a
    /// background context.
    pub async fn interrupted(&self) -> Interrupted {
        let cancelled = async {
            match &self.shutdown {
                Some(shutdown) => {
                    let mut shutdown = shutdown.clone();
                    let sender_gone = shutdown.wait_for(|cancelled| *cancelled).await.is_err();
                    // A dropped sender can never cancel us.
                    if sender_gone {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => Interrupted::Cancelled,
            _ = expired => Interrupted::DeadlineExceeded,
        }
    }

    /// Sleeps for `duration` unless interrupted first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.check()?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            reason = self.interrupted() => Err(reason),
        }
    }

    /// Drives `future` to completion unless the context is interrupted first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Interrupted> {
        self.check()?;
        tokio::select! {
            output = future => Ok(output),
            reason = self.interrupted() => Err(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_background_sleep_completes() {
        let ctx = CallContext::background();
        let start = Instant::now();
        ctx.sleep(Duration::from_secs(5)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let (tx, rx) = watch::channel(false);
        let ctx = CallContext::with_shutdown(rx);

        let sleeper = tokio::spawn(async move { ctx.sleep(Duration::from_secs(3600)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        let result = sleeper.await.unwrap();
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_sleep() {
        let ctx = CallContext::background().with_timeout(Duration::from_secs(10));
        let start = Instant::now();

        let result = ctx.sleep(Duration::from_secs(60)).await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test]
    async fn test_check_after_cancel() {
        let (tx, rx) = watch::channel(false);
        let ctx = CallContext::with_shutdown(rx);
        assert!(ctx.check().is_ok());

        tx.send(true).unwrap();
        assert_eq!(ctx.check(), Err(Interrupted::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_never_cancels() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let ctx = CallContext::with_shutdown(rx);
        ctx.sleep(Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn test_with_timeout_keeps_earlier_deadline() {
        let ctx = CallContext::background().with_timeout(Duration::from_secs(5));
        let first = ctx.deadline().unwrap();
        let narrowed = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(narrowed.deadline(), Some(first));
    }
}
