//! The token and handler contracts, plus the two leaf tokens: the
//! standalone [`CancellationToken`] and the never-cancelled [`DummyToken`].

use std::fmt;
use std::time::Duration;

use crate::slot::{CancelState, HandlerSlot, RawHandler, Registration};

/// The unblock callback owned by one blocking call site.
///
/// A handler knows how to interrupt the specific blocking primitive it was
/// built for: notify a condition variable, write to a wake descriptor, and
/// so on. It lives on the caller's frame for exactly the duration of one
/// blocking call, bracketed by a [`CancellationGuard`].
///
/// Pairing law: for every completed [`cancel`](Self::cancel) call there is
/// exactly one subsequent [`reset`](Self::reset) call, executed on the
/// thread that registered the handler, after the cancelling thread has
/// returned from `cancel`.
///
/// [`CancellationGuard`]: crate::CancellationGuard
pub trait CancelHandler: Sync {
    /// Unblocks the blocking call this handler belongs to.
    ///
    /// Runs on the cancelling thread. The token guarantees no internal lock
    /// is held across this call.
    fn cancel(&self);

    /// Returns the handler to its original state so it can be registered
    /// again (e.g. drains the wake descriptor).
    fn reset(&self) {}
}

/// A handle onto cancellable state; the thing a blocking primitive consults.
///
/// The trait is object-safe: adapters take `&dyn CancelToken` so one wait
/// routine serves standalone tokens, sourced tokens and the dummy token
/// alike.
///
/// The three registration methods implement the handshake that blocking
/// adapters use through [`CancellationGuard`]; calling them directly is
/// rarely needed.
///
/// [`CancellationGuard`]: crate::CancellationGuard
pub trait CancelToken: Sync {
    /// Observes the current cancelled state.
    fn is_cancelled(&self) -> bool;

    /// Timed wait on the token's own condition variable; returns early if
    /// the token is cancelled before or during the wait.
    fn sleep_for(&self, duration: Duration);

    /// Attempts to install `handler` as the token's single handler.
    ///
    /// Returns false when the token was already cancelled, in which case
    /// nothing was registered and the caller must not block.
    ///
    /// # Safety
    ///
    /// At most one handler may be registered at a time, and `handler` must
    /// stay valid and unmoved until the registration is torn down by
    /// [`try_unregister`](Self::try_unregister) or
    /// [`unregister`](Self::unregister).
    unsafe fn try_register(&self, handler: &dyn CancelHandler) -> bool;

    /// Fast-path removal of the registered handler. Returns false when a
    /// concurrent cancellation has claimed the handler; the caller must then
    /// finish through [`unregister`](Self::unregister).
    ///
    /// # Safety
    ///
    /// A handler must currently be registered.
    unsafe fn try_unregister(&self) -> bool;

    /// Slow-path removal: blocks until the in-flight cancellation has fully
    /// run the handler's `cancel`, then pairs it with `handler.reset()`.
    ///
    /// # Safety
    ///
    /// Only legal after [`try_unregister`](Self::try_unregister) returned
    /// false, with the same handler that was registered.
    unsafe fn unregister(&self, handler: &dyn CancelHandler);
}

/// A standalone cancellation token with its own cancellation state.
///
/// Created live; [`cancel`](Self::cancel) is idempotent and
/// [`reset`](Self::reset) returns a cancelled token to the live state once
/// no blocking call holds it.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use rescind::{sleep_for, CancelToken, CancellationToken};
///
/// let token = Arc::new(CancellationToken::new());
/// let sleeper = {
///     let token = Arc::clone(&token);
///     std::thread::spawn(move || {
///         sleep_for(Duration::from_secs(60), &*token);
///         token.is_cancelled()
///     })
/// };
///
/// token.cancel();
/// assert!(sleeper.join().unwrap());
/// ```
pub struct CancellationToken {
    state: CancelState,
    slot: HandlerSlot,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            state: CancelState::new(),
            slot: HandlerSlot::new(),
        }
    }

    /// Cancels the token, unblocking a registered blocking call.
    ///
    /// Idempotent. The registered handler, if any, runs on this thread with
    /// no lock held.
    pub fn cancel(&self) {
        if !self.state.begin_cancel() {
            return;
        }
        if let Some(handler) = self.slot.take_registered() {
            // Claimed by the exchange above; valid until we flag cancel_done
            // and the registering thread finishes its slow-path unregister.
            unsafe { handler.cancel() };
        }
        self.state.finish_cancel();
    }

    /// Returns a cancelled token to the live state.
    ///
    /// # Panics
    ///
    /// Panics if a handler is still registered or a cancellation is still in
    /// flight.
    pub fn reset(&self) {
        self.state.reset(&self.slot);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.state.is_cancelled())
            .finish()
    }
}

impl CancelToken for CancellationToken {
    fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    fn sleep_for(&self, duration: Duration) {
        self.state.sleep_for(duration);
    }

    unsafe fn try_register(&self, handler: &dyn CancelHandler) -> bool {
        match unsafe { self.slot.try_register(RawHandler::new(handler)) } {
            Registration::Registered => true,
            Registration::AlreadyCancelled => false,
            Registration::FirstUse => unreachable!("standalone slots start empty"),
        }
    }

    unsafe fn try_unregister(&self) -> bool {
        self.slot.try_unregister()
    }

    unsafe fn unregister(&self, handler: &dyn CancelHandler) {
        // The canceller owns the handler until it flags cancel_done; only
        // then is the reset side of the pairing law ours to run.
        self.state.wait_cancel_done();
        handler.reset();
    }
}

/// A token that is never cancelled.
///
/// Lets call sites take cancellation unconditionally while callers opt out
/// at zero cost: registration succeeds trivially and
/// [`sleep_for`](CancelToken::sleep_for) is a plain timed sleep.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyToken;

impl DummyToken {
    pub fn new() -> Self {
        Self
    }
}

impl CancelToken for DummyToken {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn sleep_for(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    unsafe fn try_register(&self, _handler: &dyn CancelHandler) -> bool {
        true
    }

    unsafe fn try_unregister(&self) -> bool {
        true
    }

    unsafe fn unregister(&self, _handler: &dyn CancelHandler) {}
}
