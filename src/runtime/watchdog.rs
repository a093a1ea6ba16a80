//! Per-worker execution timeout.
//!
//! A background thread sleeps until the armed deadline passes and then runs
//! the worker's termination hook. Arming and disarming happen under the same
//! lock the thread fires under, so once [`Watchdog::disarm`] returns the hook
//! will not run for that call.

use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Default)]
struct State {
    deadline: Option<Instant>,
    fired: bool,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
}

pub(crate) struct Watchdog {
    timeout: Duration,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start the watchdog thread. `on_timeout` runs on that thread.
    pub fn spawn<F>(name: String, timeout: Duration, on_timeout: F) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || run(&thread_shared, on_timeout))?;

        Ok(Self {
            timeout,
            shared,
            thread: Some(thread),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start the clock for one call.
    pub fn arm(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = Some(Instant::now() + self.timeout);
        state.fired = false;
        self.shared.wakeup.notify_one();
    }

    /// Stop the clock. Returns whether the deadline passed while armed.
    pub fn disarm(&self) -> bool {
        let mut state = self.shared.state.lock();
        state.deadline = None;
        std::mem::take(&mut state.fired)
    }
}

fn run<F: Fn()>(shared: &Shared, on_timeout: F) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let deadline = state.deadline;
        match deadline {
            None => shared.wakeup.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                state.fired = true;
                debug!("execution deadline passed; terminating");
                on_timeout();
            }
            Some(deadline) => {
                let _ = shared.wakeup.wait_until(&mut state, deadline);
            }
        }
    }
    trace!("watchdog stopped");
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wakeup.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(timeout: Duration) -> (Watchdog, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let watchdog = Watchdog::spawn("watchdog-test".to_string(), timeout, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (watchdog, hits)
    }

    #[test]
    fn test_fires_after_deadline() {
        let (watchdog, hits) = counting(Duration::from_millis(20));
        watchdog.arm();
        thread::sleep(Duration::from_millis(200));
        assert!(watchdog.disarm());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disarm_before_deadline() {
        let (watchdog, hits) = counting(Duration::from_secs(5));
        watchdog.arm();
        assert!(!watchdog.disarm());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rearm_resets_fired_flag() {
        let (watchdog, hits) = counting(Duration::from_millis(100));
        watchdog.arm();
        thread::sleep(Duration::from_millis(400));
        assert!(watchdog.disarm());

        watchdog.arm();
        assert!(!watchdog.disarm());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_stops_thread() {
        let (watchdog, hits) = counting(Duration::from_millis(10));
        drop(watchdog);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
