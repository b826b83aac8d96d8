//! End-to-end handshake scenarios: sleepers, condvar waiters and the
//! guard/cancel race.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rescind::{
    sleep_for, wait, CancelHandler, CancelToken, CancellationGuard, CancellationToken, Thread,
};

#[test]
fn cancel_interrupts_an_idle_sleeper() {
    let finished = Arc::new(AtomicBool::new(false));
    let worker = {
        let finished = Arc::clone(&finished);
        Thread::spawn(move |token| {
            while !token.is_cancelled() {
                sleep_for(Duration::from_secs(60), token);
            }
            finished.store(true, Ordering::SeqCst);
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    assert!(!finished.load(Ordering::SeqCst));

    let start = Instant::now();
    worker.stop().unwrap();
    assert!(finished.load(Ordering::SeqCst));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn cancel_interrupts_a_condvar_wait() {
    struct Fixture {
        mutex: Mutex<()>,
        cv: Condvar,
        token: CancellationToken,
        finished: AtomicBool,
    }

    let fixture = Arc::new(Fixture {
        mutex: Mutex::new(()),
        cv: Condvar::new(),
        token: CancellationToken::new(),
        finished: AtomicBool::new(false),
    });

    let waiter = {
        let fixture = Arc::clone(&fixture);
        std::thread::spawn(move || {
            let mut lock = fixture.mutex.lock();
            while !fixture.token.is_cancelled() {
                wait(&fixture.cv, &mut lock, &fixture.token);
            }
            fixture.finished.store(true, Ordering::SeqCst);
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    assert!(!fixture.finished.load(Ordering::SeqCst));

    fixture.token.cancel();
    waiter.join().unwrap();
    assert!(fixture.finished.load(Ordering::SeqCst));
    assert!(fixture.token.is_cancelled());
}

#[derive(Default)]
struct RaceHandler {
    cancelled: AtomicBool,
    reset: AtomicBool,
}

impl CancelHandler for RaceHandler {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }
}

// Sweeps registration delays across the cancellation instant. Whatever the
// interleaving, the outcome is binary: registration lost (no callback at
// all) or registration won (cancel landed on the handler and the teardown
// paired the reset).
#[test]
fn guard_and_cancel_race_is_all_or_nothing() {
    for delay_us in (0..2_000).step_by(50) {
        let token = Arc::new(CancellationToken::new());
        let handler = Arc::new(RaceHandler::default());
        let release = Arc::new(AtomicBool::new(false));

        let worker = {
            let token = Arc::clone(&token);
            let handler = Arc::clone(&handler);
            let release = Arc::clone(&release);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_micros(delay_us as u64));
                let guard = unsafe { CancellationGuard::new(&*token, &*handler) };
                let lost = guard.is_cancelled();
                // Hold the registration until the canceller is done, so a
                // successful registration is always hit by the cancel.
                while !release.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_micros(20));
                }
                lost
            })
        };

        token.cancel();
        release.store(true, Ordering::SeqCst);
        let lost = worker.join().unwrap();

        let fired_cancel = handler.cancelled.load(Ordering::SeqCst);
        let fired_reset = handler.reset.load(Ordering::SeqCst);
        if lost {
            assert!(
                !fired_cancel && !fired_reset,
                "unregistered handler saw a callback (delay {delay_us}us)"
            );
        } else {
            assert!(
                fired_cancel && fired_reset,
                "registered handler missed a callback (delay {delay_us}us)"
            );
        }
    }
}

#[test]
fn reset_restores_a_cancellable_wait() {
    struct Fixture {
        mutex: Mutex<()>,
        cv: Condvar,
        token: CancellationToken,
    }

    let fixture = Arc::new(Fixture {
        mutex: Mutex::new(()),
        cv: Condvar::new(),
        token: CancellationToken::new(),
    });

    fixture.token.cancel();
    fixture.token.reset();
    assert!(!fixture.token.is_cancelled());

    // A fresh wait must block normally...
    let blocked = Arc::new(AtomicBool::new(true));
    let waiter = {
        let fixture = Arc::clone(&fixture);
        let blocked = Arc::clone(&blocked);
        std::thread::spawn(move || {
            let mut lock = fixture.mutex.lock();
            while !fixture.token.is_cancelled() {
                wait(&fixture.cv, &mut lock, &fixture.token);
            }
            blocked.store(false, Ordering::SeqCst);
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    assert!(blocked.load(Ordering::SeqCst));

    // ...and be cancellable again.
    fixture.token.cancel();
    waiter.join().unwrap();
    assert!(!blocked.load(Ordering::SeqCst));
}

#[test]
fn sleep_latency_stays_bounded() {
    // Cancelled before the call: no measurable wait at all.
    let token = CancellationToken::new();
    token.cancel();
    let start = Instant::now();
    sleep_for(Duration::from_secs(60), &token);
    assert!(start.elapsed() < Duration::from_millis(100));

    // Live token: the sleep runs its full course.
    token.reset();
    let start = Instant::now();
    sleep_for(Duration::from_millis(50), &token);
    assert!(start.elapsed() >= Duration::from_millis(50));
}
