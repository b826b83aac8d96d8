//! Cancellable condition-variable waits.
//!
//! The handler for this adapter notifies the caller's condition variable
//! under the caller's own mutex. Taking that mutex is what closes the
//! lost-wakeup window between the waiter's cancellation check and its
//! entry into the wait. The symmetric hazard (the waiter already woke and
//! would hold that mutex while the canceller blocks on it inside the
//! handler) is resolved in teardown: the slow-path unregister runs with
//! the waiter's lock dropped and retaken afterwards.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::guard::CancellationGuard;
use crate::token::{CancelHandler, CancelToken};

struct CvHandler<'a, T> {
    mutex: &'a Mutex<T>,
    cv: &'a Condvar,
}

impl<T: Send> CancelHandler for CvHandler<'_, T> {
    fn cancel(&self) {
        // Without the lock, a broadcast issued between the waiter's
        // cancellation check and its wait would be lost.
        let _lock = self.mutex.lock();
        self.cv.notify_all();
    }
}

fn finish<T: ?Sized>(guard: &mut CancellationGuard<'_>, lock: &mut MutexGuard<'_, T>) {
    if guard.try_release() {
        return;
    }
    // The canceller may be blocked on our mutex inside the handler. Once
    // unregister returns it has left cancel(), so relocking is safe.
    MutexGuard::unlocked(lock, || guard.release_slow());
}

/// Cancellable `cv.wait(lock)`.
///
/// Returns immediately when `token` is already cancelled. A cancellation
/// during the wait returns as if notified; callers consult
/// [`is_cancelled`](CancelToken::is_cancelled). Spurious wakeups pass
/// through as with a plain wait; use [`wait_while`] for a predicate loop.
pub fn wait<T: Send>(cv: &Condvar, lock: &mut MutexGuard<'_, T>, token: &dyn CancelToken) {
    let handler = CvHandler {
        mutex: MutexGuard::mutex(lock),
        cv,
    };
    let mut guard = unsafe { CancellationGuard::new(token, &handler) };
    if guard.is_cancelled() {
        return;
    }
    cv.wait(lock);
    finish(&mut guard, lock);
}

/// Cancellable `cv.wait_for(lock, timeout)`.
///
/// Returns true iff the wait timed out; both notification and cancellation
/// yield false.
pub fn wait_for<T: Send>(
    cv: &Condvar,
    lock: &mut MutexGuard<'_, T>,
    timeout: Duration,
    token: &dyn CancelToken,
) -> bool {
    let handler = CvHandler {
        mutex: MutexGuard::mutex(lock),
        cv,
    };
    let mut guard = unsafe { CancellationGuard::new(token, &handler) };
    if guard.is_cancelled() {
        return false;
    }
    let timed_out = cv.wait_for(lock, timeout).timed_out();
    finish(&mut guard, lock);
    timed_out
}

/// Cancellable `cv.wait_until(lock, deadline)`.
///
/// Returns true iff the deadline passed; both notification and
/// cancellation yield false.
pub fn wait_until<T: Send>(
    cv: &Condvar,
    lock: &mut MutexGuard<'_, T>,
    deadline: Instant,
    token: &dyn CancelToken,
) -> bool {
    let handler = CvHandler {
        mutex: MutexGuard::mutex(lock),
        cv,
    };
    let mut guard = unsafe { CancellationGuard::new(token, &handler) };
    if guard.is_cancelled() {
        return false;
    }
    let timed_out = cv.wait_until(lock, deadline).timed_out();
    finish(&mut guard, lock);
    timed_out
}

/// Predicate-loop wait: blocks while `condition` holds and `token` is
/// live.
///
/// Returns true when the condition was seen to clear, false when the wait
/// ended by cancellation first. Short-circuits without registering when
/// the condition is already clear.
pub fn wait_while<T: Send, F>(
    cv: &Condvar,
    lock: &mut MutexGuard<'_, T>,
    token: &dyn CancelToken,
    mut condition: F,
) -> bool
where
    F: FnMut(&mut T) -> bool,
{
    if !condition(&mut **lock) {
        return true;
    }
    let handler = CvHandler {
        mutex: MutexGuard::mutex(lock),
        cv,
    };
    let mut guard = unsafe { CancellationGuard::new(token, &handler) };
    let mut cleared = false;
    if !guard.is_cancelled() {
        loop {
            if !condition(&mut **lock) {
                cleared = true;
                break;
            }
            if token.is_cancelled() {
                break;
            }
            cv.wait(lock);
        }
    }
    finish(&mut guard, lock);
    cleared
}
