//! Cooperative cancellation.
//!
//! Long-running snapshot operations take a `CancelToken` and poll it at
//! their suspension points (directory open, subprocess spawn, batch reads,
//! copy chunks). Cancelling never interrupts a rename in progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// The cancellation signal, returned unchanged by every operation that observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("context canceled")]
pub struct Cancelled;

/// Shared cancellation flag.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that starts out cancelled.
    pub fn cancelled() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once the token has been cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
