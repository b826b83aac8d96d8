//! Cancellable `poll(2)` and `read(2)`. Unix only.
//!
//! Each call owns a self-signalling wake descriptor, an eventfd on Linux
//! and a CLOEXEC pipe pair elsewhere, polled alongside the caller's
//! descriptor. Cancellation writes one value to the wake side; the
//! handler's `reset` reads it back so the descriptor is reusable by a
//! subsequent call.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::guard::CancellationGuard;
use crate::token::{CancelHandler, CancelToken};

/// Failures of the poll adapter's own syscalls, surfaced at the call site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create wake descriptor: {0}")]
    Signal(#[source] io::Error),
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
}

// Under the pairing law the wake descriptor holds at most one pending
// value, so its read/write can only fail on a programming error. That is
// the fatal class of misuse, not an error to surface.
fn wake_failed(op: &str) -> ! {
    let err = io::Error::last_os_error();
    tracing::error!(error = %err, "wake descriptor {op} failed");
    panic!("wake descriptor {op} failed: {err}");
}

#[cfg(all(target_os = "linux", feature = "eventfd"))]
struct WakeFd {
    event: OwnedFd,
}

#[cfg(all(target_os = "linux", feature = "eventfd"))]
impl WakeFd {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            event: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn poll_fd(&self) -> RawFd {
        self.event.as_raw_fd()
    }
}

#[cfg(all(target_os = "linux", feature = "eventfd"))]
impl CancelHandler for WakeFd {
    fn cancel(&self) {
        let value: u64 = 1;
        let n = unsafe { libc::write(self.event.as_raw_fd(), (&value as *const u64).cast(), 8) };
        if n != 8 {
            wake_failed("write");
        }
    }

    fn reset(&self) {
        let mut value: u64 = 0;
        let n = unsafe { libc::read(self.event.as_raw_fd(), (&mut value as *mut u64).cast(), 8) };
        if n != 8 {
            wake_failed("read");
        }
    }
}

#[cfg(not(all(target_os = "linux", feature = "eventfd")))]
struct WakeFd {
    rx: OwnedFd,
    tx: OwnedFd,
}

#[cfg(not(all(target_os = "linux", feature = "eventfd")))]
impl WakeFd {
    fn new() -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let rx = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let tx = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        for fd in [&rx, &tx] {
            if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(Self { rx, tx })
    }

    fn poll_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }
}

#[cfg(not(all(target_os = "linux", feature = "eventfd")))]
impl CancelHandler for WakeFd {
    fn cancel(&self) {
        let byte = 0u8;
        let n = unsafe { libc::write(self.tx.as_raw_fd(), (&byte as *const u8).cast(), 1) };
        if n != 1 {
            wake_failed("write");
        }
    }

    fn reset(&self) {
        let mut byte = 0u8;
        let n = unsafe { libc::read(self.rx.as_raw_fd(), (&mut byte as *mut u8).cast(), 1) };
        if n != 1 {
            wake_failed("read");
        }
    }
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            // Round up so sub-millisecond timeouts still block.
            let ms = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

/// Cancellable `poll(2)` on a single descriptor.
///
/// Polls `fd` for `events` together with the call's wake descriptor.
/// Returns the `revents` of `fd`: `0` on timeout and on cancellation
/// (whether the token was cancelled before the call or during it); callers
/// distinguish the two through [`is_cancelled`](CancelToken::is_cancelled).
/// `timeout` of `None` blocks indefinitely.
pub fn poll(
    fd: RawFd,
    events: i16,
    timeout: Option<Duration>,
    token: &dyn CancelToken,
) -> Result<i16, Error> {
    let handler = WakeFd::new().map_err(Error::Signal)?;
    let guard = unsafe { CancellationGuard::new(token, &handler) };
    if guard.is_cancelled() {
        return Ok(0);
    }

    let mut fds = [
        libc::pollfd {
            fd,
            events,
            revents: 0,
        },
        libc::pollfd {
            fd: handler.poll_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    if unsafe { libc::poll(fds.as_mut_ptr(), 2, timeout_ms(timeout)) } < 0 {
        return Err(Error::Poll(io::Error::last_os_error()));
    }
    Ok(fds[0].revents)
}

/// Cancellable `read(2)`: waits for readability with [`poll`], then reads.
///
/// Returns `Ok(0)` when the wait ended by cancellation instead of data.
pub fn read(fd: RawFd, buf: &mut [u8], token: &dyn CancelToken) -> Result<usize, Error> {
    if poll(fd, libc::POLLIN, None, token)? != libc::POLLIN {
        return Ok(0);
    }
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        return Err(Error::Read(io::Error::last_os_error()));
    }
    Ok(n as usize)
}
