use parking_lot::{Condvar, Mutex};
use std::{collections::VecDeque, sync::Arc, thread::JoinHandle};
use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool for order placement jobs, so venue calls never
/// block the strategy or poller that initiates them.
///
/// One pool is shared process-wide and passed explicitly to each exchange
/// (no singleton).
#[derive(Debug)]
pub struct JobPool {
    inner: Arc<PoolInner>,
    workers: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
struct PoolInner {
    state: Mutex<PoolState>,
    job_available: Condvar,
    job_finished: Condvar,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    running: usize,
    stop: bool,
}

impl std::fmt::Debug for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolState")
            .field("queued", &self.queue.len())
            .field("running", &self.running)
            .field("stop", &self.stop)
            .finish()
    }
}

impl JobPool {
    pub const DEFAULT_SIZE: usize = 8;

    pub fn new(name: &str, size: usize) -> Self {
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState::default()),
            job_available: Condvar::new(),
            job_finished: Condvar::new(),
        });

        let workers = (0..size)
            .map(|index| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("{name}-{index}"))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn job pool worker")
            })
            .collect();

        Self { inner, workers }
    }

    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        state.queue.push_back(Box::new(job));
        self.inner.job_available.notify_one();
    }

    /// Block until the queue is drained and every running job returned.
    pub fn wait_for_all_jobs(&self) {
        let mut state = self.inner.state.lock();
        while !state.queue.is_empty() || state.running > 0 {
            self.inner.job_finished.wait(&mut state);
        }
    }
}

impl Default for JobPool {
    fn default() -> Self {
        Self::new("jobs", Self::DEFAULT_SIZE)
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.stop = true;
            self.inner.job_available.notify_all();
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("job pool worker panicked during shutdown");
            }
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let job = {
            let mut state = inner.state.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.running += 1;
                    break job;
                }
                if state.stop {
                    return;
                }
                inner.job_available.wait(&mut state);
            }
        };

        job();

        let mut state = inner.state.lock();
        state.running -= 1;
        inner.job_finished.notify_all();
    }
}
