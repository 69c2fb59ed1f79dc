use crate::shutdown::Shutdown;
use parking_lot::{Condvar, Mutex};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Named counter + condvar signalling primitive.
///
/// Pollers `trigger` it on every successful publication; waiters block on
/// `wait_for_next` / `wait_for_at_least` with a millisecond timeout. Clones
/// share the same underlying counter.
#[derive(Debug, Clone)]
pub struct SignalEvent {
    name: &'static str,
    inner: Arc<SignalEventInner>,
}

#[derive(Debug)]
struct SignalEventInner {
    counter: Mutex<u64>,
    condvar: Condvar,
}

impl SignalEvent {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(SignalEventInner {
                counter: Mutex::new(0),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn counter(&self) -> u64 {
        *self.inner.counter.lock()
    }

    pub fn trigger(&self) {
        let mut counter = self.inner.counter.lock();
        *counter += 1;
        self.inner.condvar.notify_all();
    }

    pub fn reset(&self) {
        let mut counter = self.inner.counter.lock();
        *counter = 0;
        self.inner.condvar.notify_all();
    }

    /// Block until the counter moves past its value on entry. Returns true
    /// if it moved within the timeout.
    pub fn wait_for_next(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut counter = self.inner.counter.lock();
        let entry = *counter;
        while *counter == entry {
            if self
                .inner
                .condvar
                .wait_until(&mut counter, deadline)
                .timed_out()
            {
                return *counter != entry;
            }
        }
        true
    }

    /// Block until the counter reaches at least `target`. Returns true if
    /// reached within the timeout.
    pub fn wait_for_at_least(&self, target: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut counter = self.inner.counter.lock();
        while *counter < target {
            if self
                .inner
                .condvar
                .wait_until(&mut counter, deadline)
                .timed_out()
            {
                return *counter >= target;
            }
        }
        true
    }

    /// Wait until every event in `events` has triggered at least once since
    /// this call. On timeout, returns the first event that stayed silent;
    /// `None` means all of them fired.
    ///
    /// With a [`Shutdown`] handle, the wait ends early (returning `None`)
    /// once shutdown is requested.
    pub fn wait_for_all<'a>(
        timeout: Duration,
        events: &[&'a SignalEvent],
        shutdown: Option<&Shutdown>,
    ) -> Option<&'a SignalEvent> {
        let entries: Vec<u64> = events.iter().map(|event| event.counter()).collect();
        let deadline = Instant::now() + timeout;

        loop {
            let silent = events
                .iter()
                .zip(&entries)
                .find(|(event, entry)| event.counter() == **entry);

            let Some((silent, _)) = silent else {
                return None;
            };

            if shutdown.is_some_and(|shutdown| !shutdown.is_active()) {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return Some(silent);
            }
            Self::poll_sleep(deadline - now, shutdown);
        }
    }

    /// Wait until any event in `events` triggers. Returns whether one did
    /// within the timeout; a requested shutdown ends the wait early with
    /// false.
    pub fn wait_for_any(
        timeout: Duration,
        events: &[&SignalEvent],
        shutdown: Option<&Shutdown>,
    ) -> bool {
        let entries: Vec<u64> = events.iter().map(|event| event.counter()).collect();
        let deadline = Instant::now() + timeout;

        loop {
            let moved = events
                .iter()
                .zip(&entries)
                .any(|(event, entry)| event.counter() != *entry);
            if moved {
                return true;
            }

            if shutdown.is_some_and(|shutdown| !shutdown.is_active()) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            Self::poll_sleep(deadline - now, shutdown);
        }
    }

    fn poll_sleep(remaining: Duration, shutdown: Option<&Shutdown>) {
        const POLL: Duration = Duration::from_millis(250);

        let slice = POLL.min(remaining);
        match shutdown {
            Some(shutdown) => {
                shutdown.sleep(slice);
            }
            None => std::thread::sleep(slice),
        }
    }
}
