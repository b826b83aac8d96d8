//! Scoped registration of a handler against a token.

use crate::token::{CancelHandler, CancelToken};

/// Ties one handler to one token for a lexical scope.
///
/// Construction registers the handler; dropping the guard unregisters it,
/// synchronising with any concurrent cancellation so that exactly one of
/// two things happens: the fast-path unregister wins and the handler was
/// never touched, or the cancellation wins and the guard waits for the
/// handler's `cancel` to complete before pairing it with `reset`.
///
/// The common path costs two atomic exchanges, one on each end, with no
/// lock taken.
///
/// Blocking adapters that hold a lock the handler's `cancel` also takes
/// must not rely on `Drop`: they release the lock, run
/// [`release_slow`](Self::release_slow), and retake it (see the condvar
/// adapter).
pub struct CancellationGuard<'g> {
    token: &'g dyn CancelToken,
    handler: &'g (dyn CancelHandler + 'g),
    registered: bool,
}

impl<'g> CancellationGuard<'g> {
    /// Registers `handler` with `token` for the guard's lifetime.
    ///
    /// # Safety
    ///
    /// `handler` must outlive the registration: the guard must be dropped
    /// (or fully released) before the handler is, and must not be leaked
    /// while the token can still be cancelled. The blocking adapters uphold
    /// this by keeping handler and guard on the same call frame.
    pub unsafe fn new(
        token: &'g dyn CancelToken,
        handler: &'g (dyn CancelHandler + 'g),
    ) -> Self {
        let registered = unsafe { token.try_register(handler) };
        Self {
            token,
            handler,
            registered,
        }
    }

    /// Whether registration found the token already cancelled.
    ///
    /// A true return means the caller must not enter its blocking wait; the
    /// handler was never registered and will see neither callback.
    pub fn is_cancelled(&self) -> bool {
        !self.registered
    }

    /// Fast-path teardown. Returns false when a concurrent cancellation has
    /// claimed the handler; the caller must then run
    /// [`release_slow`](Self::release_slow), dropping any lock the
    /// handler's `cancel` takes first.
    pub fn try_release(&mut self) -> bool {
        if !self.registered {
            return true;
        }
        if unsafe { self.token.try_unregister() } {
            self.registered = false;
            true
        } else {
            false
        }
    }

    /// Slow-path teardown: waits out the in-flight cancellation, then pairs
    /// the handler's `reset`.
    pub fn release_slow(&mut self) {
        if !self.registered {
            return;
        }
        unsafe { self.token.unregister(self.handler) };
        self.registered = false;
    }
}

impl Drop for CancellationGuard<'_> {
    fn drop(&mut self) {
        if self.try_release() {
            return;
        }
        self.release_slow();
    }
}
