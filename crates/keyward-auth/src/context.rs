//! Caller-scoped cancellation and deadlines.
//!
//! Every store-touching operation can be wrapped in a [`CallContext`]. When
//! the caller's [`CancellationToken`] fires or the deadline passes, the
//! in-flight operation future is dropped (abandoning the pending store
//! call) and [`AuthError::Cancelled`] is returned.
//!
//! ```ignore
//! let ctx = CallContext::background().with_timeout(Duration::from_millis(250));
//! let metadata = ctx.run(sessions.resolve_session(&subject_id, &token)).await?;
//! ```

use std::future::{Future, pending};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{AuthError, AuthResult};

/// Cancellation signal and deadline for one logical request.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancellation: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Cancels operations when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Cancels operations still running at `deadline`.
    ///
    /// An earlier deadline already set is kept.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Cancels operations still running `timeout` from now.
    ///
    /// A timeout too large to represent as an instant never fires.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` if the token fired or the deadline has passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Runs `operation` unless the context is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the context was cancelled before or while the
    /// operation ran, otherwise the operation's own result.
    pub async fn run<F, T>(&self, operation: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        if self.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        let cancelled = async {
            match &self.cancellation {
                Some(token) => token.cancelled().await,
                None => pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => {
                tracing::debug!("operation cancelled by caller");
                Err(AuthError::Cancelled)
            }
            () = expired => {
                tracing::debug!("operation deadline exceeded");
                Err(AuthError::Cancelled)
            }
            result = operation => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = CallContext::background();
        assert!(!ctx.is_cancelled());

        let value = ctx.run(async { Ok::<_, AuthError>(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_operation_error_passes_through() {
        let ctx = CallContext::background();

        let result: AuthResult<()> = ctx.run(async { Err(AuthError::Expired) }).await;
        assert!(matches!(result, Err(AuthError::Expired)));
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_operation() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::background().with_cancellation(token);

        let polled = AtomicBool::new(false);
        let result = ctx
            .run(async {
                polled.store(true, Ordering::SeqCst);
                Ok::<_, AuthError>(())
            })
            .await;

        assert!(matches!(result, Err(AuthError::Cancelled)));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_while_running() {
        let token = CancellationToken::new();
        let ctx = CallContext::background().with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let result: AuthResult<()> = ctx.run(pending()).await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(10));

        let result: AuthResult<()> = ctx.run(pending()).await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_huge_timeout_never_fires() {
        let ctx = CallContext::background().with_timeout(Duration::MAX);
        assert!(!ctx.is_cancelled());

        let value = ctx.run(async { Ok::<_, AuthError>(7) }).await.unwrap();
        assert_eq!(value, 7);

        // An earlier finite deadline still applies
        let ctx = CallContext::background()
            .with_timeout(Duration::from_millis(10))
            .with_timeout(Duration::MAX);
        let result: AuthResult<()> = ctx.run(pending()).await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[tokio::test]
    async fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = CallContext::background()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(60));

        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }
}
