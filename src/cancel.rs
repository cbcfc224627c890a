//! Request-scoped cancellation: a token plus an optional deadline.
//!
//! Every blocking step of a conversion (waiting for the listener gate,
//! waiting for a worker to accept connections, waiting for a child process
//! to exit) races against [`Cancellation::done`]. A client disconnect maps to
//! [`Cancellation::cancel`]; a request timeout maps to the deadline.
//!
//! Background work owned by the supervisor uses [`Cancellation::never`] so it
//! is not torn down by the request that happened to trigger it.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`Cancellation`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancelReason {
    /// The token was cancelled explicitly (client went away, Ctrl-C, shutdown).
    Cancelled,
    /// The deadline elapsed before the work completed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "context cancelled"),
            CancelReason::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// A cloneable, boundable cancellation context.
#[derive(Debug, Clone)]
pub struct Cancellation {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    /// A context with no deadline that fires only when [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Wrap an existing token, e.g. one tied to process shutdown.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A context that fires after `timeout` or when cancelled, whichever comes first.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    /// A fresh root context with no deadline, not linked to any caller's
    /// context. Only an explicit [`cancel`](Self::cancel) on it or one of its
    /// clones or children fires it.
    pub fn never() -> Self {
        Self::new()
    }

    /// Tighten the deadline of this context. An earlier existing deadline wins.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// Derive a context that is cancelled together with `self` but can also
    /// be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context (and every child derived from it).
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the reason if the context has already fired.
    pub fn reason(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            return Some(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once the context fires.
    pub async fn done(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => CancelReason::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                CancelReason::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_context_is_not_done() {
        let ctx = Cancellation::new();
        assert!(!ctx.is_done());
        assert_eq!(ctx.reason(), None);
    }

    #[tokio::test]
    async fn cancel_propagates_to_children() {
        let parent = Cancellation::new();
        let child = parent.child();
        parent.cancel();
        assert_eq!(child.done().await, CancelReason::Cancelled);
        assert!(child.is_done());
    }

    #[tokio::test]
    async fn cancelling_a_child_leaves_the_parent_alone() {
        let parent = Cancellation::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test]
    async fn never_is_a_root_unaffected_by_other_contexts() {
        let request = Cancellation::with_timeout(Duration::from_millis(1));
        let lifecycle = Cancellation::never();
        let restart = lifecycle.child();
        request.cancel();
        assert!(lifecycle.deadline().is_none());
        assert!(!lifecycle.is_done());
        assert!(!restart.is_done());
        lifecycle.cancel();
        assert!(restart.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_with_its_own_reason() {
        let ctx = Cancellation::with_timeout(Duration::from_millis(50));
        assert_eq!(ctx.done().await, CancelReason::DeadlineExceeded);
        assert_eq!(ctx.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let ctx = Cancellation::with_timeout(Duration::from_secs(1)).timeout(Duration::from_secs(60));
        let deadline = ctx.deadline().unwrap();
        assert!(deadline <= Instant::now() + Duration::from_secs(1));
    }
}
