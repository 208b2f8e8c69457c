//! Cooperative cancellation.

use crate::error::ItemError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared cancellation flag threaded through every bulk call.
///
/// Workers check it between items and before each remote call; nothing is
/// interrupted preemptively.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(ItemError::Cancelled)` once cancelled, for use with `?` in item
    /// operations.
    pub fn check(&self) -> Result<(), ItemError> {
        if self.is_cancelled() {
            Err(ItemError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cancel after `delay`. Abort the returned handle to disarm.
    pub fn cancel_after(&self, delay: Duration) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::warn!(?delay, "job timeout elapsed, cancelling");
            signal.cancel();
        })
    }
}
