//! Cooperative cancellation shared by producers, engines and signal handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Cloneable cancellation flag.
///
/// Every engine observes the token before consuming an input item and before
/// each poll iteration, so a `cancel()` takes effect within one poll interval.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Box<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled when either it or `self` is cancelled.
    ///
    /// Cancelling the child leaves the parent untouched; engines use this to
    /// stop their own tasks on a fatal error without signalling the caller.
    pub fn child(&self) -> CancelToken {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Sleep for `interval` unless cancelled.
    ///
    /// Returns `false` if the token was (or became) cancelled.
    pub fn sleep(&self, interval: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        thread::sleep(interval);
        !self.is_cancelled()
    }
}
