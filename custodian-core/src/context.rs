//! Cancellation context shared by every multi-step operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{CustodianError, Result};

/// A cloneable cancellation signal.
///
/// Clones observe the same flag, so a producer thread and its consumer can
/// both react when either side (or the caller) cancels.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every operation sharing this context.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CustodianError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_cancellation() {
        let ctx = Context::new();
        let clone = ctx.clone();
        assert!(ctx.check().is_ok());

        clone.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check(), Err(CustodianError::Cancelled)));
    }
}
