//! Worker threads that run continuations.
//!
//! Every continuation the runtime does not run inline (timer expirations,
//! registered waits, steps handed off to bound stack depth) is submitted to
//! an [`Executor`]. [`WorkerPool`] is the production executor: a fixed set of
//! named threads fed by a crossbeam channel.

use core_types::AsyncError;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs.
pub trait Executor: Send + Sync {
    /// Submits a job. Fails if the executor no longer accepts work.
    fn execute(&self, job: Job) -> Result<(), AsyncError>;
}

/// Runs a job, logging instead of unwinding if it panics.
fn run_job(job: Job) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
        let error = AsyncError::from_panic(payload);
        tracing::error!(%error, "job panicked");
    }
}

/// Executor that runs every job on the submitting thread.
///
/// Useful for deterministic tests of components that accept an executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) -> Result<(), AsyncError> {
        run_job(job);
        Ok(())
    }
}

/// A fixed-size pool of worker threads.
///
/// # Examples
///
/// ```
/// use async_runtime::{Executor, WorkerPool};
/// use crossbeam::channel;
///
/// let pool = WorkerPool::new(2, "example").unwrap();
/// let (tx, rx) = channel::bounded(1);
/// pool.execute(Box::new(move || tx.send(42).unwrap())).unwrap();
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
pub struct WorkerPool {
    /// Sending side of the job queue; `None` once shut down
    sender: Mutex<Option<Sender<Job>>>,
    /// Handles of the worker threads
    handles: Mutex<Vec<JoinHandle<()>>>,
    /// Number of workers started
    size: usize,
}

impl WorkerPool {
    /// Starts `threads` workers named `<prefix>-<index>`.
    pub fn new(threads: usize, prefix: &str) -> Result<Self, AsyncError> {
        if threads == 0 {
            return Err(AsyncError::invalid_argument(
                "a worker pool needs at least one thread",
            ));
        }

        let (sender, receiver) = channel::unbounded::<Job>();
        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver: Receiver<Job> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{prefix}-{index}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        run_job(job);
                    }
                })
                .map_err(|e| {
                    AsyncError::with_source(
                        core_types::ErrorKind::Scheduling,
                        "failed to spawn worker thread",
                        e,
                    )
                })?;
            handles.push(handle);
        }
        tracing::debug!(threads, prefix, "worker pool started");

        Ok(WorkerPool {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            size: threads,
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Stops accepting jobs and waits for the workers to drain the queue.
    ///
    /// Calling this from one of the pool's own workers does not wait for
    /// that worker.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());

        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) -> Result<(), AsyncError> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender
                .send(job)
                .map_err(|_| AsyncError::scheduling("worker pool is shut down")),
            None => Err(AsyncError::scheduling("worker pool is shut down")),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorkerPool {{ size: {} }}", self.size)
    }
}
