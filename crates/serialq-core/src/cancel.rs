//! Cooperative cancellation.
//!
//! A [`CancelToken`] is handed to every [`QueueAction::run`] call. Killing the
//! action flips the token; the work function decides where it is safe to look
//! at it. Nothing is ever interrupted mid-execution.
//!
//! [`QueueAction::run`]: crate::action::QueueAction::run

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Returned by [`CancelToken::check`] once cancellation has been requested.
///
/// Work functions whose declared error implements `From<Cancelled>` can bail
/// out of a yield point with `token.check()?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("action was cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Yield point: `Err(Cancelled)` once the token has been cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
