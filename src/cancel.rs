//! Cooperative cancellation of a running pipeline.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

type CancelCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: Mutex<Vec<CancelCallback>>,
}

/// Shared cancellation flag.
///
/// Producers check it between records; the pipeline registers callbacks that
/// abort every queue, so threads blocked in a push or pop wake up as well.
/// Only the first cancellation counts.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Runs every registered callback once; a
    /// panicking callback is logged and skipped.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let reason = reason.into();
        info!(%reason, "pipeline cancelled");
        *self.inner.reason.write() = Some(reason);

        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for callback in callbacks {
            run_callback(callback);
        }
    }

    /// Register a callback to run on cancellation; runs it now if the token
    /// is already cancelled
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut callbacks = self.inner.callbacks.lock();
            if !self.is_cancelled() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        run_callback(Box::new(callback));
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Reason given to the first [`cancel`](CancellationToken::cancel) call
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.read().clone()
    }
}

fn run_callback(callback: CancelCallback) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        warn!("cancellation callback panicked: {:?}", e);
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
