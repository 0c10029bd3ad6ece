//! A bounded-concurrency worker pool for decompression tasks.
//!
//! Two priority queues (`high`, `normal`) feed a lazily-grown set of OS
//! threads, capped at `max_workers`. Workers above `min_workers` that sit
//! idle past `idle_timeout` exit, so a burst of work grows the pool and a
//! quiet stretch shrinks it back down. Submission never blocks — the caller
//! (the orchestrator, see [`crate::pipeline`]) is responsible for bounding
//! how many tasks are outstanding at once.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::{Condvar, Mutex};

use crate::error::Error;

/// Relative scheduling class for a submitted task. High-priority tasks are
/// always dequeued before normal ones; within a class, FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

type Job = Box<dyn FnOnce() + Send>;

struct QueueState {
    high: VecDeque<Job>,
    normal: VecDeque<Job>,
    worker_count: usize,
    idle_count: usize,
    shutdown: bool,
}

struct PoolInner {
    state: Mutex<QueueState>,
    work_available: Condvar,
    min_workers: usize,
    max_workers: usize,
    idle_timeout: Duration,
}

/// A fixed-maximum-concurrency execution substrate for decompression tasks.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

/// A handle to a submitted task's eventual result.
pub struct TaskHandle {
    index: u64,
    receiver: Receiver<Result<Vec<u8>, Error>>,
}

impl TaskHandle {
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Blocks until the task completes, returning its result. If the pool
    /// shut down before the task ran, returns [`Error::PoolShutdown`].
    pub fn wait(self) -> Result<Vec<u8>, Error> {
        self.receiver.recv().unwrap_or(Err(Error::PoolShutdown))
    }

    /// Returns the result if already available, without blocking.
    pub fn try_wait(&self) -> Option<Result<Vec<u8>, Error>> {
        self.receiver.try_recv().ok()
    }
}

impl WorkerPool {
    /// Creates a pool with no workers yet running; they spawn lazily as
    /// work arrives.
    pub fn new(min_workers: usize, max_workers: usize, idle_timeout: Duration) -> Self {
        let min_workers = min_workers.max(1);
        let max_workers = max_workers.max(min_workers);
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(QueueState {
                    high: VecDeque::new(),
                    normal: VecDeque::new(),
                    worker_count: 0,
                    idle_count: 0,
                    shutdown: false,
                }),
                work_available: Condvar::new(),
                min_workers,
                max_workers,
                idle_timeout,
            }),
        }
    }

    /// Submits a decompression job tagged with `index` (the originating
    /// frame's position in the file, used by the orchestrator to restore
    /// order downstream). Returns immediately with a [`TaskHandle`]; never
    /// blocks even when every worker is busy.
    pub fn submit<F>(&self, index: u64, priority: Priority, job: F) -> Result<TaskHandle, Error>
    where
        F: FnOnce() -> Result<Vec<u8>, Error> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let inner = self.inner.clone();

        let run: Job = Box::new(move || {
            let result = match catch_unwind(AssertUnwindSafe(job)) {
                Ok(r) => r,
                Err(panic) => Err(Error::CodecError {
                    codec: crate::codec::CodecId::Raw,
                    reason: panic_message(panic),
                }),
            };
            let _ = tx.send(result);
        });

        {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return Err(Error::PoolShutdown);
            }
            match priority {
                Priority::High => state.high.push_back(run),
                Priority::Normal => state.normal.push_back(run),
            }

            if state.idle_count == 0 && state.worker_count < self.inner.max_workers {
                state.worker_count += 1;
                spawn_worker(inner);
            }
        }
        self.inner.work_available.notify_one();

        Ok(TaskHandle { index, receiver: rx })
    }

    /// Signals every worker to exit once its current job (if any)
    /// finishes, and fails any future submission with `PoolShutdown`.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
        }
        self.inner.work_available.notify_all();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked with a non-string payload".to_string()
    }
}

fn spawn_worker(inner: Arc<PoolInner>) {
    std::thread::spawn(move || worker_loop(inner));
}

fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        let job = {
            let mut state = inner.state.lock();
            loop {
                if let Some(job) = state.high.pop_front().or_else(|| state.normal.pop_front()) {
                    break Some(job);
                }
                if state.shutdown {
                    break None;
                }

                state.idle_count += 1;
                let timed_out = inner.work_available.wait_for(&mut state, inner.idle_timeout).timed_out();
                state.idle_count -= 1;

                if timed_out && state.worker_count > inner.min_workers && state.high.is_empty() && state.normal.is_empty() {
                    state.worker_count -= 1;
                    return;
                }
            }
        };

        match job {
            Some(job) => job(),
            None => {
                let mut state = inner.state.lock();
                state.worker_count = state.worker_count.saturating_sub(1);
                return;
            }
        }
    }
}

/// A cooperative cancellation flag shared between the pipeline orchestrator
/// and any long-running codec that checks it mid-decompression.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
