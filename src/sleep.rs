//! Free-standing cancellable sleeps.

use std::time::{Duration, Instant};

use crate::token::CancelToken;

/// Blocks the current thread for `duration`, returning early if `token`
/// is cancelled before or during the sleep.
///
/// Delegates to the token's own timed wait: real tokens sleep on their
/// internal condition variable, which `cancel` broadcasts; the dummy token
/// sleeps plainly.
pub fn sleep_for(duration: Duration, token: &dyn CancelToken) {
    token.sleep_for(duration);
}

/// Blocks the current thread until `deadline`, returning early if `token`
/// is cancelled. A deadline in the past returns immediately.
pub fn sleep_until(deadline: Instant, token: &dyn CancelToken) {
    sleep_for(deadline.saturating_duration_since(Instant::now()), token);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::token::{CancellationToken, DummyToken};

    #[test]
    fn sleep_runs_to_completion_when_live() {
        let token = CancellationToken::new();
        let start = Instant::now();
        sleep_for(Duration::from_millis(30), &token);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn pre_cancelled_sleep_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let start = Instant::now();
        sleep_for(Duration::from_secs(60), &token);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn cancel_cuts_sleep_short() {
        let token = Arc::new(CancellationToken::new());
        let sleeper = {
            let token = Arc::clone(&token);
            std::thread::spawn(move || {
                let start = Instant::now();
                sleep_for(Duration::from_secs(60), &*token);
                start.elapsed()
            })
        };

        std::thread::sleep(Duration::from_millis(100));
        token.cancel();
        assert!(sleeper.join().unwrap() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_until_past_deadline_returns_immediately() {
        let token = DummyToken::new();
        let start = Instant::now();
        sleep_until(Instant::now() - Duration::from_secs(1), &token);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
