//! A thread wrapper that owns a cancellation token.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::token::{CancelToken, CancellationToken};

/// A spawned thread bundled with the token that cancels it.
///
/// [`spawn`](Self::spawn) threads a fresh [`CancellationToken`] into the
/// worker function; dropping the handle cancels the token and joins, so a
/// `Thread` cannot outlive its owner's scope. A worker panic is forwarded
/// to the joining thread, unless that thread is already unwinding.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use rescind::{sleep_for, CancelToken, Thread};
///
/// let counter = Thread::spawn(|token| {
///     let mut ticks = 0u32;
///     while !token.is_cancelled() {
///         sleep_for(Duration::from_millis(10), token);
///         ticks += 1;
///     }
///     ticks
/// });
///
/// std::thread::sleep(Duration::from_millis(50));
/// let ticks = counter.stop().unwrap();
/// assert!(ticks > 0);
/// ```
pub struct Thread<T = ()> {
    token: Arc<CancellationToken>,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> Thread<T> {
    /// Spawns a thread running `f` with a token owned by this handle.
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
    {
        let token = Arc::new(CancellationToken::new());
        let worker = Arc::clone(&token);
        let handle = thread::spawn(move || f(&worker));
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// The token threaded into the worker function.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Requests cancellation without joining.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the worker function has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Waits for the thread without cancelling it first.
    pub fn join(mut self) -> thread::Result<T> {
        self.handle.take().expect("thread already joined").join()
    }

    /// Cancels the token and joins the thread.
    pub fn stop(mut self) -> thread::Result<T> {
        self.token.cancel();
        self.handle.take().expect("thread already joined").join()
    }
}

impl<T> fmt::Debug for Thread<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("cancelled", &self.token.is_cancelled())
            .field("joined", &self.handle.is_none())
            .finish()
    }
}

impl<T> Drop for Thread<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.token.cancel();
            if let Err(panic) = handle.join() {
                forward_panic(panic);
            }
        }
    }
}

fn forward_panic(panic: Box<dyn Any + Send>) {
    if thread::panicking() {
        // Already unwinding; a double panic would abort.
        tracing::warn!("cancelled thread panicked during unwind");
    } else {
        std::panic::resume_unwind(panic);
    }
}
