//! The handle returned by every `subscribe` call.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Keeps a callback registered until [`Subscription::unsubscribe`] is called
/// or the handle is dropped.
///
/// Unsubscribing is synchronous and idempotent: once it returns, the callback
/// receives nothing more, and calling it again does nothing.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    active: AtomicBool,
    cancel: Box<dyn Fn() + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new<F>(cancel: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            active: AtomicBool::new(true),
            cancel: Box::new(cancel),
        }
    }

    /// Removes the callback. Only the first call has an effect.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            (self.cancel)();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
