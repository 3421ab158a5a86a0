//! Cancellation token for cooperative run cancellation.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// A token for cooperative cancellation.
///
/// The scheduler checks the token before every batch. Cancellation is
/// idempotent: only the first reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// The reason is stored before the flag is raised, so a reader that sees
    /// the token cancelled always sees its reason.
    pub fn cancel(&self, reason: impl Into<String>) {
        let mut slot = self.reason.write();
        if slot.is_none() {
            let reason = reason.into();
            info!(reason = %reason, "Cancellation requested");
            *slot = Some(reason);
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        token.cancel("operator request");
        token.cancel("second");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("operator request".to_string()));
    }

    #[test]
    fn test_cancel_is_visible_across_threads() {
        let token = Arc::new(CancellationToken::new());
        let remote = Arc::clone(&token);
        std::thread::spawn(move || remote.cancel("interrupted"))
            .join()
            .unwrap();

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("interrupted"));
    }
}
