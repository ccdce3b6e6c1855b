//! Worker pool for cache operations.
//!
//! All fabric calls and response marshaling run on this pool so the
//! transport threads never block on cache work. The pool keeps a fixed
//! minimum of worker threads, grows on demand when a task is submitted
//! and no worker is idle (up to an optional cap), and backs everything
//! with an unbounded task queue. Completions resume awaiting tasks
//! through oneshot channels.

use crate::core::error::{GateError, GateResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Job>,
    shutdown: bool,
}

struct PoolInner {
    state: Mutex<PoolState>,
    available: Condvar,
    idle: AtomicUsize,
    workers: AtomicUsize,
    max_workers: usize,
}

/// A bounded-growth worker pool with an unbounded task queue.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool with `min_workers` threads started eagerly.
    ///
    /// `max_workers` of zero means unbounded growth.
    pub fn new(min_workers: usize, max_workers: usize) -> Self {
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
            idle: AtomicUsize::new(0),
            workers: AtomicUsize::new(0),
            max_workers,
        });

        let pool = Self { inner };
        for _ in 0..min_workers.max(1) {
            pool.spawn_worker();
        }
        pool
    }

    /// Number of worker threads currently alive.
    pub fn worker_count(&self) -> usize {
        self.inner.workers.load(Ordering::Relaxed)
    }

    /// Submit a closure and await its result on the pool.
    pub async fn run<T, F>(&self, f: F) -> GateResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.execute(Box::new(move || {
            let _ = tx.send(f());
        }));
        rx.await
            .map_err(|_| GateError::internal("worker pool dropped task before completion"))
    }

    /// Submit a fire-and-forget closure.
    pub fn execute(&self, job: Job) {
        {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return;
            }
            state.queue.push_back(job);
        }

        // Grow when every worker is busy and the cap allows it.
        if self.inner.idle.load(Ordering::Acquire) == 0 {
            let workers = self.inner.workers.load(Ordering::Acquire);
            if self.inner.max_workers == 0 || workers < self.inner.max_workers {
                self.spawn_worker();
            }
        }
        self.inner.available.notify_one();
    }

    /// Stop accepting work and wake all workers so they can exit.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        drop(state);
        self.inner.available.notify_all();
    }

    fn spawn_worker(&self) {
        let inner = self.inner.clone();
        inner.workers.fetch_add(1, Ordering::AcqRel);
        std::thread::Builder::new()
            .name("gridgate-worker".to_string())
            .spawn(move || worker_loop(inner))
            .expect("failed to spawn pool worker");
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        let job = {
            let mut state = inner.state.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    break job;
                }
                if state.shutdown {
                    inner.workers.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
                inner.idle.fetch_add(1, Ordering::AcqRel);
                inner.available.wait(&mut state);
                inner.idle.fetch_sub(1, Ordering::AcqRel);
            }
        };
        job();
    }
}
