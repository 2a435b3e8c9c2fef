//! Deferred sync scheduling.
//!
//! A single worker thread parks on a condition variable and runs the sync
//! task when a scheduled deadline passes. Each commit re-arms the deadline,
//! so bursts of commits collapse into one file write `delay` after the last
//! of them. Task failures are the task's problem (the store logs and
//! retries on the next commit); the worker never dies.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

struct SchedulerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    wake: Condvar,
}

/// Single-shot, re-armable deferred task runner.
pub(crate) struct SyncScheduler {
    inner: Arc<SchedulerInner>,
    worker: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    /// Start the worker thread. `task` runs on that thread whenever a
    /// scheduled deadline expires.
    pub fn start(task: Box<dyn Fn() + Send + 'static>) -> Self {
        let inner = Arc::new(SchedulerInner {
            state: Mutex::new(SchedulerState {
                deadline: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("basalt-sync".into())
            .spawn(move || loop {
                {
                    let mut state = worker_inner.state.lock();
                    loop {
                        if state.shutdown {
                            return;
                        }
                        match state.deadline {
                            None => {
                                worker_inner.wake.wait(&mut state);
                            }
                            Some(deadline) => {
                                if Instant::now() >= deadline {
                                    state.deadline = None;
                                    break;
                                }
                                let _ = worker_inner.wake.wait_until(&mut state, deadline);
                            }
                        }
                    }
                }
                task();
            })
            .expect("failed to spawn sync worker thread");

        Self {
            inner,
            worker: Some(worker),
        }
    }

    /// (Re)arm the deadline `delay` from now, superseding any pending one.
    pub fn schedule_in(&self, delay: Duration) {
        let mut state = self.inner.state.lock();
        state.deadline = Some(Instant::now() + delay);
        self.inner.wake.notify_one();
    }

    /// Drop any pending deadline.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        state.deadline = None;
        self.inner.wake.notify_one();
    }

    /// Stop the worker thread; a pending deadline is discarded.
    pub fn stop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            self.inner.wake.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
            debug!("sync worker stopped");
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_runs_after_deadline() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let scheduler = SyncScheduler::start(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        scheduler.schedule_in(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rearm_coalesces() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let scheduler = SyncScheduler::start(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // Five rapid re-arms collapse to a single run.
        for _ in 0..5 {
            scheduler.schedule_in(Duration::from_millis(60));
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_prevents_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let scheduler = SyncScheduler::start(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        scheduler.schedule_in(Duration::from_millis(40));
        scheduler.cancel();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_joins_worker() {
        let mut scheduler = SyncScheduler::start(Box::new(|| {}));
        scheduler.schedule_in(Duration::from_secs(3600));
        scheduler.stop();
        // A second stop is a no-op.
        scheduler.stop();
    }
}
