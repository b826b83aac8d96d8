//! Cooperative cancellation for blocking operations across threads.
//!
//! # Why another cancellation crate?
//! Most cancellation tokens answer one question ("has someone asked me to
//! stop?") and leave the hard part to the caller: a thread that is *parked
//! inside* a blocking call cannot poll anything. `rescind` makes the
//! blocking calls themselves cancellable. A thread sleeping, waiting on a
//! condition variable, or blocked in `poll(2)` is woken the instant
//! another thread cancels its token, without busy-waiting and without
//! tearing the thread down.
//!
//! Cancellation is strictly cooperative: nothing preempts running code,
//! and the token carries no result or error. It is a boolean the unblocked
//! thread consults.
//!
//! # The handshake
//! Three pieces cooperate:
//!
//! - a [`CancelToken`], a handle onto cancellable state that blocking
//!   primitives consult;
//! - a [`CancelHandler`], supplied per blocking call, which knows how to
//!   unblock that call (broadcast the condition variable, write to a wake
//!   descriptor);
//! - a [`CancellationGuard`], which registers the handler with the token
//!   for the duration of the call and tears the registration down
//!   afterwards, whatever order cancellation, wake-up and scope exit land
//!   in.
//!
//! When nobody cancels, the whole protocol costs two atomic exchanges and
//! never touches a lock. When a cancellation does race the end of a wait,
//! the guard waits for the handler's `cancel` to finish and pairs it with
//! exactly one `reset`, so a handler is never torn down mid-callback.
//!
//! # Blocking primitives
//! - [`sleep_for`] / [`sleep_until`]: cancellable sleeps;
//! - [`wait`], [`wait_for`], [`wait_until`], [`wait_while`]: cancellable
//!   waits on a caller-supplied [`parking_lot::Condvar`];
//! - [`poll::poll`] / [`poll::read`]: cancellable descriptor I/O (Unix);
//! - [`Thread`]: a thread handle that cancels and joins on drop.
//!
//! Tokens come in three shapes: the standalone [`CancellationToken`], the
//! [`CancellationSource`] fan-out (one `cancel` fires every token it
//! vended), and the zero-cost [`DummyToken`] for callers that opt out.
//!
//! # Example
//! A worker that can be interrupted in the middle of a long sleep:
//!
//! ```
//! use std::time::Duration;
//!
//! use rescind::{sleep_for, CancelToken, Thread};
//!
//! let worker = Thread::spawn(|token| {
//!     while !token.is_cancelled() {
//!         // a minute per iteration, but unblocked instantly on cancel
//!         sleep_for(Duration::from_secs(60), token);
//!     }
//! });
//!
//! // dropping the handle cancels the token and joins the thread
//! drop(worker);
//! ```
//!
//! Fanning one shutdown signal out to many workers:
//!
//! ```
//! use std::time::Duration;
//!
//! use rescind::{sleep_for, CancellationSource};
//!
//! let source = CancellationSource::new();
//! let workers: Vec<_> = (0..4)
//!     .map(|_| {
//!         let token = source.create_token();
//!         std::thread::spawn(move || sleep_for(Duration::from_secs(60), &token))
//!     })
//!     .collect();
//!
//! source.cancel();
//! for worker in workers {
//!     worker.join().unwrap();
//! }
//! ```

pub mod condvar;
pub mod guard;
#[cfg(unix)]
pub mod poll;
pub mod sleep;
mod slot;
pub mod source;
pub mod thread;
pub mod token;

pub use condvar::{wait, wait_for, wait_until, wait_while};
pub use guard::CancellationGuard;
pub use sleep::{sleep_for, sleep_until};
pub use source::{CancellationSource, SourceToken};
pub use thread::Thread;
pub use token::{CancelHandler, CancelToken, CancellationToken, DummyToken};
