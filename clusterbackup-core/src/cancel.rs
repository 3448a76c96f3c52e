//! Cooperative cancellation shared between a caller and a running operation.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::{BackupError, Result};

/// Cancellation signal handed to every blocking call of a run.
///
/// Clones share the same state, so the caller keeps one clone and passes
/// another into the engine. Once cancelled a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every operation holding a clone of this token.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Fail with [`BackupError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BackupError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Future that resolves once the token is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancelled()
    }
}
