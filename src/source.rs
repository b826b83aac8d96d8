//! One-to-many cancellation: a source that fires every token it vended.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::slot::{CancelState, HandlerSlot, RawHandler, Registration};
use crate::token::{CancelHandler, CancelToken};

struct SourceShared {
    state: CancelState,
    // Keyed weak registry of vended token slots. Tokens link themselves on
    // first registration and unlink on drop; the cancel walk snapshots the
    // live ones.
    tokens: Mutex<HashMap<u64, Weak<HandlerSlot>>>,
    next_id: AtomicU64,
}

impl SourceShared {
    fn new() -> Self {
        Self {
            state: CancelState::new(),
            tokens: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn cancel(&self) {
        if !self.state.begin_cancel() {
            return;
        }
        // Snapshot under the registry lock, fire with no lock held: a
        // handler's cancel may take the waiter's own mutex.
        let slots: Vec<Arc<HandlerSlot>> = self
            .tokens
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        debug!(tokens = slots.len(), "cancelling source");
        for slot in &slots {
            if let Some(handler) = slot.take_registered() {
                unsafe { handler.cancel() };
            }
        }
        self.state.finish_cancel();
    }
}

/// A fan-out parent: one [`cancel`](Self::cancel) fires every live token
/// vended by [`create_token`](Self::create_token).
///
/// The source and its tokens share state through a reference-counted
/// handle; whichever side is dropped last frees it. Dropping the source
/// cancels outstanding tokens as a safety net.
///
/// # Example
///
/// ```
/// use rescind::{CancelToken, CancellationSource};
///
/// let source = CancellationSource::new();
/// let a = source.create_token();
/// let b = source.create_token();
///
/// source.cancel();
/// assert!(a.is_cancelled() && b.is_cancelled());
/// ```
pub struct CancellationSource {
    shared: Mutex<Arc<SourceShared>>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Arc::new(SourceShared::new())),
        }
    }

    /// Vends a token bound to this source's current cancellation state.
    pub fn create_token(&self) -> SourceToken {
        let shared = Arc::clone(&self.shared.lock());
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        SourceToken {
            shared,
            slot: Arc::new(HandlerSlot::new_pending()),
            id,
        }
    }

    /// Cancels every live token vended from the current state. Idempotent;
    /// linear in the number of live tokens.
    pub fn cancel(&self) {
        let shared = Arc::clone(&self.shared.lock());
        shared.cancel();
    }

    /// Swaps in a fresh cancellation state.
    ///
    /// Tokens vended earlier keep referencing the old state, so they stay
    /// cancelled; tokens created from here on are live. Only legal while no
    /// guard is active against the old state.
    pub fn reset(&self) {
        let mut shared = self.shared.lock();
        *shared = Arc::new(SourceShared::new());
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.shared.lock().state.is_cancelled())
            .finish()
    }
}

impl Drop for CancellationSource {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A token vended by a [`CancellationSource`].
///
/// Consults the source's shared cancelled flag; its own handler slot keeps
/// register/unregister lock-free after the first registration has linked
/// the token into the source's registry.
pub struct SourceToken {
    shared: Arc<SourceShared>,
    slot: Arc<HandlerSlot>,
    id: u64,
}

impl fmt::Debug for SourceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceToken")
            .field("id", &self.id)
            .field("cancelled", &self.shared.state.is_cancelled())
            .finish()
    }
}

impl CancelToken for SourceToken {
    fn is_cancelled(&self) -> bool {
        self.shared.state.is_cancelled()
    }

    fn sleep_for(&self, duration: Duration) {
        self.shared.state.sleep_for(duration);
    }

    unsafe fn try_register(&self, handler: &dyn CancelHandler) -> bool {
        match unsafe { self.slot.try_register(RawHandler::new(handler)) } {
            Registration::Registered => true,
            Registration::AlreadyCancelled => false,
            Registration::FirstUse => {
                // Link into the registry. Serialising on the registry lock
                // against the cancel walk's snapshot guarantees the handler
                // is either fired by the walk or refused here, never missed.
                let mut tokens = self.shared.tokens.lock();
                if self.shared.state.is_cancelled() {
                    drop(tokens);
                    self.slot.abort_first_use();
                    return false;
                }
                tokens.insert(self.id, Arc::downgrade(&self.slot));
                true
            }
        }
    }

    unsafe fn try_unregister(&self) -> bool {
        self.slot.try_unregister()
    }

    unsafe fn unregister(&self, handler: &dyn CancelHandler) {
        // cancel_done flips only after the walk has fired every handler.
        self.shared.state.wait_cancel_done();
        handler.reset();
    }
}

impl Drop for SourceToken {
    fn drop(&mut self) {
        debug_assert!(
            !self.slot.is_registered(),
            "source token dropped while a guard holds it"
        );
        self.shared.tokens.lock().remove(&self.id);
    }
}
