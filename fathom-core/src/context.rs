//! Cancellation and deadline propagation for storage operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, Result};

/// Carries the cancellation token and optional absolute deadline for one
/// operation (or a whole scan). Cheap to clone; children created with
/// [`OpContext::child_with_timeout`] are cancelled with their parent and can
/// only tighten the deadline, never extend it.
#[derive(Debug, Clone)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        OpContext { cancel, deadline }
    }

    /// No deadline, fresh token. The usual starting point for services.
    pub fn unbounded() -> Self {
        OpContext {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        OpContext {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Child context sharing cancellation, with the tighter of the two
    /// deadlines.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(candidate)),
            None => Some(candidate),
        };
        OpContext {
            cancel: self.cancel.child_token(),
            deadline,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Budget left before the deadline. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail fast when the operation should not proceed.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FsError::Cancelled(what.to_string()));
        }
        if let Some(remaining) = self.remaining()
            && remaining.is_zero()
        {
            return Err(FsError::Timeout(format!("{what}: deadline expired")));
        }
        Ok(())
    }

    /// Run a future under this context: it is abandoned on cancellation and
    /// cut off at the deadline.
    pub async fn bound<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        self.check(what)?;
        let limited = async {
            match self.remaining() {
                None => fut.await,
                Some(remaining) if remaining.is_zero() => Err(FsError::Timeout(
                    format!("{what}: deadline expired"),
                )),
                Some(remaining) => {
                    match tokio::time::timeout(remaining, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(FsError::Timeout(format!(
                            "{what} exceeded {remaining:?} budget"
                        ))),
                    }
                }
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(FsError::Cancelled(what.to_string()))
            }
            result = limited => result,
        }
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::unbounded()
    }
}
