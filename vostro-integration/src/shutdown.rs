use parking_lot::{Condvar, Mutex};
use std::{sync::Arc, time::Duration};

/// Cooperative shutdown flag shared by every long-running thread of an
/// exchange. Sleeps wake early when shutdown is requested, keeping stop
/// latency bounded.
#[derive(Debug, Clone)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug)]
struct ShutdownInner {
    active: Mutex<bool>,
    condvar: Condvar,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownInner {
                active: Mutex::new(true),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.inner.active.lock()
    }

    pub fn shutdown(&self) {
        let mut active = self.inner.active.lock();
        *active = false;
        self.inner.condvar.notify_all();
    }

    /// Re-arm the flag so the handle can be reused across reconnects.
    pub fn rearm(&self) {
        let mut active = self.inner.active.lock();
        *active = true;
    }

    /// Sleep for `duration`, waking early on shutdown. Returns whether the
    /// handle is still active.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut active = self.inner.active.lock();
        if !*active {
            return false;
        }
        self.inner.condvar.wait_for(&mut active, duration);
        *active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sleep_wakes_on_shutdown() {
        let shutdown = Shutdown::new();
        let sleeper = shutdown.clone();

        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let active = sleeper.sleep(Duration::from_secs(10));
            (active, start.elapsed())
        });

        std::thread::sleep(Duration::from_millis(50));
        shutdown.shutdown();

        let (active, elapsed) = handle.join().unwrap();
        assert!(!active);
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_sleep_runs_full_duration_when_active() {
        let shutdown = Shutdown::new();
        assert!(shutdown.sleep(Duration::from_millis(10)));
        assert!(shutdown.is_active());
    }

    #[test]
    fn test_rearm() {
        let shutdown = Shutdown::new();
        shutdown.shutdown();
        assert!(!shutdown.is_active());
        shutdown.rearm();
        assert!(shutdown.is_active());
    }
}
