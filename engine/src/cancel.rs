//! Cooperative cancellation.
//!
//! Workers are never killed. The controller sets a token and the worker
//! checks it at its safe points, returning as soon as it sees it set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared per-job abort flag.
///
/// Once cancelled a token stays cancelled; every job gets a fresh token.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns false if it had already been requested.
    pub fn cancel(&self) -> bool {
        !self.inner.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_sticky_and_shared() {
        let token = CancellationToken::new();
        let worker_view = token.clone();
        assert!(!worker_view.is_cancelled());

        assert!(token.cancel());
        assert!(worker_view.is_cancelled());

        // A second request changes nothing
        assert!(!token.cancel());
        assert!(worker_view.is_cancelled());
    }

    #[test]
    fn test_new_tokens_are_independent() {
        let first = CancellationToken::new();
        first.cancel();
        let second = CancellationToken::new();
        assert!(!second.is_cancelled());
    }
}
