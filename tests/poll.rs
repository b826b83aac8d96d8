//! Cancellable poll over a pipe: data still flows, cancel still wins.

#![cfg(unix)]

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rescind::poll::poll;
use rescind::{CancelToken, Thread};

fn pipe() -> (OwnedFd, OwnedFd) {
    let mut fds = [0 as libc::c_int; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

#[test]
fn poll_loop_reads_one_byte_then_cancels_out() {
    let (rx, tx) = pipe();
    let rx_fd = rx.as_raw_fd();

    let started = Arc::new(AtomicBool::new(false));
    let worker = {
        let started = Arc::clone(&started);
        Thread::spawn(move |token| {
            started.store(true, Ordering::SeqCst);
            let mut reads = 0usize;
            while !token.is_cancelled() {
                if poll(rx_fd, libc::POLLIN, None, token).unwrap() != libc::POLLIN {
                    continue;
                }
                let mut byte = 0u8;
                assert_eq!(
                    unsafe { libc::read(rx_fd, (&mut byte as *mut u8).cast(), 1) },
                    1
                );
                reads += 1;
            }
            reads
        })
    };

    std::thread::sleep(Duration::from_millis(20));
    assert!(started.load(Ordering::SeqCst));
    assert!(!worker.is_finished());

    // One byte flows through while the loop is live.
    let byte = 0u8;
    assert_eq!(
        unsafe { libc::write(tx.as_raw_fd(), (&byte as *const u8).cast(), 1) },
        1
    );
    std::thread::sleep(Duration::from_millis(20));

    let reads = worker.stop().unwrap();
    assert_eq!(reads, 1);
}
