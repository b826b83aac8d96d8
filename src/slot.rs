use std::cell::UnsafeCell;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::token::CancelHandler;

// The handler slot is a single atomic word of four states. The handler
// pointer itself is fat (a trait object), so it travels through the cell
// next to the word: written by the registering thread before the release
// exchange that publishes REGISTERED, read only by the thread whose own
// exchange observed REGISTERED.
const EMPTY: usize = 0;
const CANCELLED: usize = 1;
const PENDING: usize = 2;
const REGISTERED: usize = 3;

/// Type-erased pointer to a frame-scoped [`CancelHandler`].
#[derive(Clone, Copy)]
pub(crate) struct RawHandler(NonNull<dyn CancelHandler>);

impl RawHandler {
    /// # Safety
    ///
    /// The pointee must stay valid and unmoved for as long as this pointer
    /// can be dereferenced, i.e. until its registration is torn down.
    pub(crate) unsafe fn new<'a>(handler: &'a (dyn CancelHandler + 'a)) -> Self {
        let raw: NonNull<dyn CancelHandler + 'a> = NonNull::from(handler);
        Self(unsafe {
            mem::transmute::<NonNull<dyn CancelHandler + 'a>, NonNull<dyn CancelHandler>>(raw)
        })
    }

    /// # Safety
    ///
    /// The pointee must still be alive.
    pub(crate) unsafe fn cancel(self) {
        unsafe { self.0.as_ref() }.cancel();
    }
}

pub(crate) enum Registration {
    /// The slot was empty; the handler is now registered.
    Registered,
    /// The token was already cancelled; nothing was registered.
    AlreadyCancelled,
    /// First registration of a sourced token; the slot now holds the
    /// handler but the token still has to be linked to its source.
    FirstUse,
}

pub(crate) struct HandlerSlot {
    state: AtomicUsize,
    handler: UnsafeCell<Option<RawHandler>>,
}

// The cell is guarded by the state word: at most one thread owns it at any
// moment (see the exchange protocol below), and handlers are `Sync`.
unsafe impl Send for HandlerSlot {}
unsafe impl Sync for HandlerSlot {}

impl HandlerSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicUsize::new(EMPTY),
            handler: UnsafeCell::new(None),
        }
    }

    /// A slot whose first registration must take the linking slow path.
    pub(crate) fn new_pending() -> Self {
        Self {
            state: AtomicUsize::new(PENDING),
            handler: UnsafeCell::new(None),
        }
    }

    /// Fast-path registration: one release exchange.
    ///
    /// # Safety
    ///
    /// `handler` must stay dereferenceable until the registration is torn
    /// down by [`try_unregister`](Self::try_unregister) or taken over by
    /// [`take_registered`](Self::take_registered).
    pub(crate) unsafe fn try_register(&self, handler: RawHandler) -> Registration {
        unsafe { *self.handler.get() = Some(handler) };
        match self.state.swap(REGISTERED, Ordering::Release) {
            EMPTY => Registration::Registered,
            CANCELLED => {
                unsafe { *self.handler.get() = None };
                self.state.store(CANCELLED, Ordering::Release);
                Registration::AlreadyCancelled
            }
            PENDING => Registration::FirstUse,
            _ => panic!("cancellation handler already registered"),
        }
    }

    /// Rolls a [`Registration::FirstUse`] back after the link was refused.
    pub(crate) fn abort_first_use(&self) {
        // Still unreachable by any canceller: the token was never linked.
        unsafe { *self.handler.get() = None };
        self.state.store(CANCELLED, Ordering::Release);
    }

    /// Fast-path unregistration: one acquire exchange. Returns false when a
    /// cancellation has taken over the slot; the caller must then go through
    /// the slow path and pair the handler's `reset`.
    pub(crate) fn try_unregister(&self) -> bool {
        match self.state.swap(EMPTY, Ordering::Acquire) {
            REGISTERED => {
                unsafe { *self.handler.get() = None };
                true
            }
            CANCELLED => {
                self.state.store(CANCELLED, Ordering::Release);
                false
            }
            _ => panic!("no cancellation handler registered"),
        }
    }

    /// Cancel-side takeover. Marks the slot cancelled and hands out the
    /// registered handler, if any. The slot stays cancelled until a reset.
    pub(crate) fn take_registered(&self) -> Option<RawHandler> {
        if self.state.swap(CANCELLED, Ordering::AcqRel) == REGISTERED {
            unsafe { (*self.handler.get()).take() }
        } else {
            None
        }
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.state.load(Ordering::Acquire) == REGISTERED
    }

    pub(crate) fn is_quiescent(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), EMPTY | CANCELLED)
    }

    /// Returns the slot to its initial state. Caller asserts quiescence.
    pub(crate) fn clear(&self) {
        unsafe { *self.handler.get() = None };
        self.state.store(EMPTY, Ordering::Release);
    }
}

/// The cancelled / cancel-done pair shared by the standalone token and the
/// token source. `cancelled` gates cancellation exactly once; `done` closes
/// the happens-before chain from a completed `cancel` callback to the
/// registering thread's `reset`.
pub(crate) struct CancelState {
    cancelled: AtomicBool,
    done: Mutex<bool>,
    cv: Condvar,
}

impl CancelState {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            done: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Claims the one cancellation. Returns false when already cancelled.
    pub(crate) fn begin_cancel(&self) -> bool {
        let _done = self.done.lock();
        if self.cancelled.load(Ordering::Relaxed) {
            return false;
        }
        self.cancelled.store(true, Ordering::Release);
        true
    }

    pub(crate) fn finish_cancel(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cv.notify_all();
    }

    /// Blocks until the in-flight cancellation has completed.
    pub(crate) fn wait_cancel_done(&self) {
        tracing::trace!("unregister lost the race; waiting for cancel to finish");
        let mut done = self.done.lock();
        while !*done {
            self.cv.wait(&mut done);
        }
    }

    /// Timed wait on the state's own condition variable; wakes early on
    /// cancellation because `finish_cancel` broadcasts the same cv.
    pub(crate) fn sleep_for(&self, duration: Duration) {
        let mut done = self.done.lock();
        if self.cancelled.load(Ordering::Relaxed) {
            return;
        }
        let _ = self.cv.wait_for(&mut done, duration);
    }

    /// Returns to the live state. Panics unless fully quiescent: nothing
    /// registered and no cancellation half-way through.
    pub(crate) fn reset(&self, slot: &HandlerSlot) {
        let mut done = self.done.lock();
        assert!(
            slot.is_quiescent() && self.cancelled.load(Ordering::Relaxed) == *done,
            "cancellation token is in use"
        );
        self.cancelled.store(false, Ordering::Release);
        *done = false;
        slot.clear();
    }
}
