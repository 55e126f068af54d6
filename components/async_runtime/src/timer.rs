//! One-shot timers.
//!
//! A single timer thread keeps pending jobs ordered by deadline and hands
//! each expired job to the runtime's executor, so timer callbacks never run
//! on the timer thread itself.

use crate::pool::{Executor, Job};
use core_types::{AsyncError, ErrorKind};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Ordering key of a pending timer: deadline first, then insertion order.
type TimerKey = (Instant, u64);

struct TimerQueue {
    entries: BTreeMap<TimerKey, Job>,
    next_sequence: u64,
    shutdown: bool,
}

struct TimerShared {
    queue: Mutex<TimerQueue>,
    wakeup: Condvar,
    executor: Arc<dyn Executor>,
}

/// Timer service backed by one thread.
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a scheduled timer job.
#[derive(Clone)]
pub struct TimerHandle {
    shared: Weak<TimerShared>,
    key: Option<TimerKey>,
}

impl TimerHandle {
    /// Cancels the job. Returns `true` if it had not fired yet.
    pub fn cancel(&self) -> bool {
        let (Some(shared), Some(key)) = (self.shared.upgrade(), self.key) else {
            return false;
        };
        let removed = shared.queue.lock().entries.remove(&key);
        removed.is_some()
    }

    /// Whether the job is still waiting for its deadline.
    pub fn is_pending(&self) -> bool {
        match (self.shared.upgrade(), self.key) {
            (Some(shared), Some(key)) => shared.queue.lock().entries.contains_key(&key),
            _ => false,
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle").field("key", &self.key).finish()
    }
}

impl Timer {
    /// Starts the timer thread. Expired jobs are submitted to `executor`.
    pub fn new(executor: Arc<dyn Executor>, name: &str) -> Result<Self, AsyncError> {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(TimerQueue {
                entries: BTreeMap::new(),
                next_sequence: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            executor,
        });

        let worker = shared.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || timer_loop(&worker))
            .map_err(|e| {
                AsyncError::with_source(ErrorKind::Scheduling, "failed to spawn timer thread", e)
            })?;

        Ok(Timer {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Runs `job` on the executor once `delay` has elapsed.
    ///
    /// A delay too large to represent as a deadline never fires.
    pub fn schedule(&self, delay: Duration, job: Job) -> TimerHandle {
        let Some(deadline) = Instant::now().checked_add(delay) else {
            return TimerHandle {
                shared: Weak::new(),
                key: None,
            };
        };

        let mut queue = self.shared.queue.lock();
        let key = (deadline, queue.next_sequence);
        queue.next_sequence += 1;
        let earliest = queue.entries.keys().next().map_or(true, |first| key < *first);
        queue.entries.insert(key, job);
        drop(queue);

        if earliest {
            self.shared.wakeup.notify_one();
        }

        TimerHandle {
            shared: Arc::downgrade(&self.shared),
            key: Some(key),
        }
    }

    /// Number of jobs waiting for their deadline.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }

    /// Stops the timer thread, discarding pending jobs.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
            queue.entries.clear();
        }
        self.shared.wakeup.notify_all();

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: &TimerShared) {
    let mut queue = shared.queue.lock();
    loop {
        if queue.shutdown {
            break;
        }

        let now = Instant::now();
        let mut due = Vec::new();
        while let Some(entry) = queue.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            due.push(entry.remove());
        }

        if !due.is_empty() {
            MutexGuard::unlocked(&mut queue, || {
                for job in due {
                    if let Err(error) = shared.executor.execute(job) {
                        tracing::warn!(%error, "dropping expired timer job");
                    }
                }
            });
            continue;
        }

        match queue.entries.keys().next().map(|key| key.0) {
            Some(deadline) => {
                shared.wakeup.wait_until(&mut queue, deadline);
            }
            None => shared.wakeup.wait(&mut queue),
        }
    }
}
