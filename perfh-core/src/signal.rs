use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

/// One-shot stop request for a single worker.
///
/// Threads parked in [`StopSignal::sleep`] or [`StopSignal::wait`] wake as soon
/// as the request lands.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually flipped the flag.
    pub fn request(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::AcqRel);
        if first {
            let _guard = self.lock.lock();
            self.cond.notify_all();
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Sleeps for `dur` unless a stop arrives first. Returns `true` if stopped.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        let mut guard = self.lock.lock();
        while !self.is_requested() {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_requested()
    }

    pub fn wait(&self) {
        let mut guard = self.lock.lock();
        while !self.is_requested() {
            self.cond.wait(&mut guard);
        }
    }
}

/// Process-wide shutdown latch, observable from both threads and async tasks.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    reason: OnceLock<String>,
    notify: Notify,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches the signal. Only the first reason is kept.
    pub fn trigger(&self, reason: &str) -> bool {
        let first = !self.triggered.swap(true, Ordering::AcqRel);
        if first {
            let _ = self.reason.set(reason.to_string());
            tracing::info!(reason, "shutdown requested");
            {
                let _guard = self.lock.lock();
                self.cond.notify_all();
            }
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking so a trigger in between is not lost.
            notified.as_mut().enable();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }

    /// Blocks up to `timeout`. Returns `true` if the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !self.is_triggered() {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn stop_request_is_idempotent() {
        let stop = StopSignal::new();
        assert!(stop.request());
        assert!(!stop.request());
        assert!(stop.is_requested());
    }

    #[test]
    fn stop_interrupts_sleep() {
        let stop = Arc::new(StopSignal::new());
        let sleeper = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                let started = Instant::now();
                let stopped = stop.sleep(Duration::from_secs(10));
                (stopped, started.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        stop.request();

        let (stopped, elapsed) = sleeper
            .join()
            .unwrap_or_else(|_| panic!("sleeper panicked"));
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5), "elapsed={elapsed:?}");
    }

    #[test]
    fn sleep_runs_to_completion_without_stop() {
        let stop = StopSignal::new();
        assert!(!stop.sleep(Duration::from_millis(20)));
    }

    #[test]
    fn shutdown_keeps_first_reason() {
        let shutdown = ShutdownSignal::new();
        assert!(shutdown.trigger("first"));
        assert!(!shutdown.trigger("second"));
        assert_eq!(shutdown.reason(), Some("first"));
        assert!(shutdown.wait_timeout(Duration::ZERO));
    }

    #[tokio::test]
    async fn async_wait_observes_trigger_from_thread() {
        let shutdown = Arc::new(ShutdownSignal::new());
        let trigger = {
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                shutdown.trigger("test");
            })
        };

        tokio::time::timeout(Duration::from_secs(5), shutdown.wait())
            .await
            .unwrap_or_else(|_| panic!("shutdown wait timed out"));
        trigger.join().unwrap_or_else(|_| panic!("trigger panicked"));
    }
}
