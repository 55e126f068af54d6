//! Timer-driven one-shot callbacks.
//!
//! Tasks are kept in a map ordered by `(due, sequence)`, so tasks due at the
//! same instant run in the order they were queued. A background ticker
//! polls the map at the configured interval; each poll pass takes the live
//! map, submits every due task to the executor and then puts the map back.
//! Tasks queued or canceled while a pass is running are staged and merged
//! once the pass has finished, even if submitting a task panics.

use crate::pool::{Executor, Job};
use crate::runtime::Runtime;
use crate::unwind::guard;
use core_types::{AsyncError, ErrorKind};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct TaskKey {
    due: Instant,
    sequence: u64,
}

struct DeferredTask {
    key: TaskKey,
    callback: Mutex<Option<Job>>,
}

#[derive(Default)]
struct LiveSet {
    entries: BTreeMap<TaskKey, Arc<DeferredTask>>,
    polling: bool,
    add_queue: Vec<Arc<DeferredTask>>,
    remove_queue: Vec<TaskKey>,
}

struct SchedulerShared {
    live: Mutex<LiveSet>,
    executor: Arc<dyn Executor>,
    next_sequence: AtomicU64,
    /// Tasks queued and neither submitted nor canceled
    pending: AtomicUsize,
    stopped: Mutex<bool>,
    stop_signal: Condvar,
}

/// Scheduler for callbacks that run once at a due time.
///
/// # Examples
///
/// ```
/// use async_runtime::{DeferredTaskScheduler, InlineExecutor};
/// use std::sync::Arc;
/// use std::time::{Duration, Instant};
///
/// let scheduler = DeferredTaskScheduler::manual(Arc::new(InlineExecutor));
/// let handle = scheduler.queue_task(|| println!("later"), Duration::from_secs(60));
/// assert_eq!(scheduler.len(), 1);
/// assert!(handle.cancel());
/// assert_eq!(scheduler.poll_at(Instant::now() + Duration::from_secs(120)), 0);
/// ```
pub struct DeferredTaskScheduler {
    shared: Arc<SchedulerShared>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Cancels a queued task. Dropping the handle leaves the task queued.
#[derive(Clone)]
pub struct TaskHandle {
    task: Arc<DeferredTask>,
    scheduler: Weak<SchedulerShared>,
}

impl TaskHandle {
    /// Cancels the task. Returns `true` if this call prevented it from
    /// running; canceling again, or after it ran, returns `false`.
    pub fn cancel(&self) -> bool {
        if self.task.callback.lock().take().is_none() {
            return false;
        }
        if let Some(shared) = self.scheduler.upgrade() {
            shared.pending.fetch_sub(1, Ordering::AcqRel);
            shared.remove(self.task.key);
        }
        true
    }

    /// When the task is due.
    pub fn due(&self) -> Instant {
        self.task.key.due
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("due", &self.task.key.due)
            .field("sequence", &self.task.key.sequence)
            .finish()
    }
}

impl DeferredTaskScheduler {
    /// A scheduler polled every `interval` by a background thread, running
    /// due tasks on `executor`.
    pub fn new(executor: Arc<dyn Executor>, interval: Duration) -> Result<Self, AsyncError> {
        let scheduler = DeferredTaskScheduler::manual(executor);
        let shared = scheduler.shared.clone();
        let ticker = thread::Builder::new()
            .name("deferred-ticker".to_string())
            .spawn(move || tick_loop(&shared, interval))
            .map_err(|e| {
                AsyncError::with_source(ErrorKind::Scheduling, "failed to spawn deferred ticker", e)
            })?;
        *scheduler.ticker.lock() = Some(ticker);
        Ok(scheduler)
    }

    /// A scheduler with no ticker; due tasks run only when
    /// [`poll`](Self::poll) or [`poll_at`](Self::poll_at) is called.
    pub fn manual(executor: Arc<dyn Executor>) -> Self {
        DeferredTaskScheduler {
            shared: Arc::new(SchedulerShared {
                live: Mutex::new(LiveSet::default()),
                executor,
                next_sequence: AtomicU64::new(0),
                pending: AtomicUsize::new(0),
                stopped: Mutex::new(false),
                stop_signal: Condvar::new(),
            }),
            ticker: Mutex::new(None),
        }
    }

    /// Queues `callback` to run once `delay` has elapsed.
    pub fn queue_task<F>(&self, callback: F, delay: Duration) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let now = Instant::now();
        let due = now
            .checked_add(delay)
            .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365 * 30));
        self.queue_task_at(callback, due)
    }

    /// Queues `callback` to run at `due`.
    pub fn queue_task_at<F>(&self, callback: F, due: Instant) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let key = TaskKey {
            due,
            sequence: self.shared.next_sequence.fetch_add(1, Ordering::Relaxed),
        };
        let task = Arc::new(DeferredTask {
            key,
            callback: Mutex::new(Some(Box::new(callback))),
        });

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        let mut live = self.shared.live.lock();
        if live.polling {
            live.add_queue.push(task.clone());
        } else {
            live.entries.insert(key, task.clone());
        }
        drop(live);

        TaskHandle {
            task,
            scheduler: Arc::downgrade(&self.shared),
        }
    }

    /// Runs a poll pass now. Returns the number of tasks submitted.
    pub fn poll(&self) -> usize {
        self.shared.poll(Instant::now())
    }

    /// Runs a poll pass as if the current time were `now`.
    pub fn poll_at(&self, now: Instant) -> usize {
        self.shared.poll(now)
    }

    /// Number of queued tasks that have neither been submitted nor canceled.
    ///
    /// Tasks held by a running poll pass or staged during one are counted.
    pub fn len(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Whether no task is waiting to be submitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a poll pass is running.
    pub fn is_polling(&self) -> bool {
        self.shared.live.lock().polling
    }

    /// Stops the ticker. Queued tasks stay queued and can still be polled
    /// manually.
    pub fn shutdown(&self) {
        *self.shared.stopped.lock() = true;
        self.shared.stop_signal.notify_all();
        if let Some(ticker) = self.ticker.lock().take() {
            if ticker.thread().id() != thread::current().id() {
                let _ = ticker.join();
            }
        }
    }
}

impl Drop for DeferredTaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DeferredTaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredTaskScheduler")
            .field("len", &self.len())
            .finish()
    }
}

impl SchedulerShared {
    fn remove(&self, key: TaskKey) {
        let mut live = self.live.lock();
        if live.polling {
            live.remove_queue.push(key);
        } else {
            live.entries.remove(&key);
        }
    }

    fn poll(&self, now: Instant) -> usize {
        let entries = {
            let mut live = self.live.lock();
            if live.polling {
                return 0;
            }
            live.polling = true;
            std::mem::take(&mut live.entries)
        };
        let mut pass = PollPass {
            shared: self,
            entries,
        };

        let mut submitted = 0;
        while let Some(entry) = pass.entries.first_entry() {
            if entry.key().due > now {
                break;
            }
            let task = entry.remove();
            let Some(callback) = task.callback.lock().take() else {
                continue;
            };
            self.pending.fetch_sub(1, Ordering::AcqRel);
            match self.executor.execute(callback) {
                Ok(()) => submitted += 1,
                Err(error) => tracing::error!(%error, "deferred task could not be submitted"),
            }
        }
        drop(pass);

        if submitted > 0 {
            tracing::trace!(
                submitted,
                remaining = self.pending.load(Ordering::Acquire),
                "deferred poll pass"
            );
        }
        submitted
    }
}

/// The map taken out by a poll pass. Dropping it puts the map back, merges
/// the staged additions and removals and ends the pass.
struct PollPass<'a> {
    shared: &'a SchedulerShared,
    entries: BTreeMap<TaskKey, Arc<DeferredTask>>,
}

impl Drop for PollPass<'_> {
    fn drop(&mut self) {
        let mut live = self.shared.live.lock();
        live.entries = std::mem::take(&mut self.entries);
        let added = std::mem::take(&mut live.add_queue);
        for task in added {
            live.entries.insert(task.key, task);
        }
        let removed = std::mem::take(&mut live.remove_queue);
        for key in removed {
            live.entries.remove(&key);
        }
        live.polling = false;
    }
}

fn tick_loop(shared: &SchedulerShared, interval: Duration) {
    loop {
        {
            let mut stopped = shared.stopped.lock();
            if *stopped {
                return;
            }
            shared.stop_signal.wait_for(&mut stopped, interval);
            if *stopped {
                return;
            }
        }
        if let Err(error) = guard(|| Ok(shared.poll(Instant::now()))) {
            tracing::error!(%error, "deferred poll pass panicked");
        }
    }
}

impl Runtime {
    /// A deferred task scheduler that runs tasks on this runtime's workers,
    /// ticking at the configured interval.
    pub fn deferred_scheduler(&self) -> Result<DeferredTaskScheduler, AsyncError> {
        DeferredTaskScheduler::new(self.executor(), self.config().deferred_poll_interval())
    }
}
