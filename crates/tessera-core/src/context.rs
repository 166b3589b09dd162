//! # Cancellation Context
//!
//! A `Context` is threaded from the caller through to the storage
//! collaborator's apply, commit and query calls. The engine itself never
//! times out or retries; it only checks the context at those boundaries.

use crate::TesseraError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Caller-supplied cancellation signal with an optional deadline.
///
/// Clones share the same cancel flag.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled unless `cancel` is called.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the context was cancelled or its deadline passed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Return `TesseraError::Cancelled` if the context is done.
    pub fn check(&self) -> Result<(), TesseraError> {
        if self.is_done() {
            Err(TesseraError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_live() {
        assert!(Context::background().check().is_ok());
    }

    #[test]
    fn cancel_propagates_to_clones() {
        let ctx = Context::background();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(matches!(clone.check(), Err(TesseraError::Cancelled)));
    }

    #[test]
    fn expired_deadline_is_done() {
        let ctx = Context::with_timeout(Duration::ZERO);
        assert!(ctx.is_done());
    }
}
