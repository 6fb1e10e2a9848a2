//! Cancellation shared by searches and transfers.
//!
//! A [`CancellationSignal`] is cloned (via [`SharedCancellation`]) into every
//! worker. Transfers poll it between chunks and select on it while streaming
//! or backing off, so a Ctrl+C leaves partial files flushed and resumable.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared handle to a cancellation signal.
pub type SharedCancellation = Arc<CancellationSignal>;

static GLOBAL_CANCELLATION: OnceCell<SharedCancellation> = OnceCell::new();

/// Register the process-wide signal so subsystems constructed without an
/// explicit handle can discover it.
pub fn set_global_cancellation(handle: SharedCancellation) {
    let _ = GLOBAL_CANCELLATION.set(handle);
}

/// The process-wide signal, if one was registered.
pub fn global_cancellation() -> Option<SharedCancellation> {
    GLOBAL_CANCELLATION.get().cloned()
}

/// The registered process-wide signal, or a fresh one that is never fired.
pub fn global_or_detached() -> SharedCancellation {
    global_cancellation().unwrap_or_else(CancellationSignal::shared)
}

/// One-shot cancellation flag with async waiters.
#[derive(Debug, Default)]
pub struct CancellationSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationSignal {
    /// Create an unfired signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unfired signal wrapped in [`Arc`].
    pub fn shared() -> SharedCancellation {
        Arc::new(Self::new())
    }

    /// Fire the signal. Waiters are woken once; later calls are no-ops.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the signal fires (immediately if it already has).
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a cancel() between the check
        // and the await is not lost.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
