//! Cooperative cancellation token.
//!
//! One token is threaded through an entire acquisition (and through the
//! agent run loop): every phase boundary and every child-process invocation
//! checks it. Cancellation is cooperative; nothing is forcibly aborted
//! mid-write.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Clonable cancellation token.
///
/// Cloning is cheap; all clones observe the same cancelled state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is tripped. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        // Register interest before re-checking so a concurrent cancel()
        // between the check and the await cannot be missed.
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
