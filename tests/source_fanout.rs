//! Fan-out: one source cancel unblocking a crowd of waiters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rescind::{wait, CancelToken, CancellationSource};

#[test]
fn one_cancel_wakes_a_thousand_sleepers() {
    let source = CancellationSource::new();
    let sleepers: Vec<_> = (0..1_000)
        .map(|_| {
            let token = source.create_token();
            std::thread::spawn(move || {
                token.sleep_for(Duration::from_secs(60));
                token.is_cancelled()
            })
        })
        .collect();

    // Let the crowd get into its waits.
    std::thread::sleep(Duration::from_millis(200));

    let start = Instant::now();
    source.cancel();
    for sleeper in sleepers {
        assert!(sleeper.join().unwrap());
    }
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "fan-out took {:?}",
        start.elapsed()
    );
}

#[test]
fn source_cancel_unblocks_condvar_waiters() {
    struct Board {
        mutex: Mutex<()>,
        cv: Condvar,
    }

    let source = CancellationSource::new();
    let board = Arc::new(Board {
        mutex: Mutex::new(()),
        cv: Condvar::new(),
    });

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let token = source.create_token();
            let board = Arc::clone(&board);
            std::thread::spawn(move || {
                let mut lock = board.mutex.lock();
                while !token.is_cancelled() {
                    wait(&board.cv, &mut lock, &token);
                }
            })
        })
        .collect();

    std::thread::sleep(Duration::from_millis(100));
    source.cancel();
    for waiter in waiters {
        waiter.join().unwrap();
    }
}

#[test]
fn reset_partitions_old_and_new_tokens() {
    let source = CancellationSource::new();
    let old = source.create_token();
    source.cancel();
    source.reset();
    let fresh = source.create_token();

    assert!(old.is_cancelled());
    assert!(!fresh.is_cancelled());

    source.cancel();
    assert!(fresh.is_cancelled());
}
