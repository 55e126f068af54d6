//! Running several plans concurrently.
//!
//! A parallel operation owns one governing child per plan. Awaiting it
//! launches every child plan on the worker pool at once and registers a
//! single wait, bounded by the parallel operation's own timeout, on a handle
//! the children signal when the join is decided:
//!
//! - a child that ends with an error decides the join immediately; the
//!   error is captured and the remaining children are force-completed;
//! - a child that times out decides the join as timed out;
//! - otherwise the join is decided when the last child finishes.

use crate::operation::{Operation, OperationInner, Variant};
use crate::plan::Plan;
use crate::unwind::guard;
use crate::wait::{RegisteredWait, WaitCallback, WaitHandle};
use core_types::AsyncError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub(crate) struct ParallelState {
    children: Vec<Operation>,
    plans: Mutex<Vec<Plan>>,
    remaining: AtomicUsize,
    handle: WaitHandle,
    child_timed_out: AtomicBool,
    wait: Mutex<Option<RegisteredWait>>,
}

impl Operation {
    /// An operation that runs `plans` concurrently and completes when all of
    /// them have finished, when any of them fails or times out, or when
    /// `timeout` elapses.
    ///
    /// After resuming past the returned operation, call
    /// [`end`](Operation::end) on it to re-raise the first child error.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_runtime::{Operation, Plan, PlanStep, Runtime, RuntimeConfig};
    /// use crossbeam::channel;
    /// use std::time::Duration;
    ///
    /// let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    /// let (tx, rx) = channel::bounded(1);
    /// runtime.start(
    ///     |op: &Operation| {
    ///         let leaf = |child: &Operation| {
    ///             let step = child.create(Duration::from_secs(1));
    ///             step.set_completed();
    ///             vec![PlanStep::Ok(step)]
    ///         };
    ///         let both = op.create_parallel(
    ///             Duration::from_secs(5),
    ///             vec![Plan::new(leaf), Plan::new(leaf)],
    ///         );
    ///         let joined = both.clone();
    ///         std::iter::once(both).chain(
    ///             std::iter::once_with(move || joined.and_then(|p| p.end()))
    ///                 .filter_map(|ended| ended.err().map(Err)),
    ///         )
    ///     },
    ///     move |run: &Operation| tx.send(run.end().is_ok()).unwrap(),
    /// );
    /// assert!(rx.recv().unwrap());
    /// ```
    pub fn create_parallel<I>(&self, timeout: Duration, plans: I) -> Result<Operation, AsyncError>
    where
        I: IntoIterator<Item = Plan>,
    {
        let plans: Vec<Plan> = plans.into_iter().collect();
        if plans.is_empty() {
            return Err(AsyncError::invalid_argument(
                "a parallel operation needs at least one execution plan",
            ));
        }

        let runtime = self.inner.runtime.clone();
        let hooks = self.inner.hooks.clone();
        let count = plans.len();
        let inner = Arc::new_cyclic(|parallel: &Weak<OperationInner>| {
            let children = (0..count)
                .map(|_| {
                    let parallel = parallel.clone();
                    Operation::governing(
                        runtime.clone(),
                        hooks.clone(),
                        Box::new(move |child: &Operation| {
                            if let Some(parallel) = parallel.upgrade() {
                                Operation::from_inner(parallel).child_run_finished(child);
                            }
                        }),
                    )
                })
                .collect();

            OperationInner::new(
                runtime.clone(),
                timeout,
                hooks.clone(),
                Variant::Parallel(ParallelState {
                    children,
                    plans: Mutex::new(plans),
                    remaining: AtomicUsize::new(count),
                    handle: WaitHandle::new(),
                    child_timed_out: AtomicBool::new(false),
                    wait: Mutex::new(None),
                }),
            )
        });
        Ok(Operation::from_inner(inner))
    }

    fn parallel_state(&self) -> Option<&ParallelState> {
        match &self.inner.variant {
            Variant::Parallel(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn yield_parallel(
        &self,
        state: &ParallelState,
        callback: WaitCallback,
    ) -> Result<(), AsyncError> {
        self.inner.flags.lock().completed_synchronously = false;

        let plans = std::mem::take(&mut *state.plans.lock());
        tracing::debug!(children = plans.len(), "launching parallel plans");
        for (child, plan) in state.children.iter().zip(plans) {
            child.launch_queued(plan)?;
        }

        let parallel = self.clone();
        let registered = self.inner.runtime.register_wait(
            &state.handle,
            self.inner.timeout,
            Box::new(move |timed_out| {
                let child_timed_out = parallel
                    .parallel_state()
                    .is_some_and(|state| state.child_timed_out.load(Ordering::Acquire));
                callback(child_timed_out || timed_out)
            }),
        )?;
        *state.wait.lock() = Some(registered);
        Ok(())
    }

    /// Called from each child's done-callback.
    fn child_run_finished(&self, child: &Operation) {
        let Some(state) = self.parallel_state() else {
            return;
        };

        let decided = guard(|| {
            if state.remaining.load(Ordering::Acquire) == 0 || self.is_completed() {
                return Ok(None);
            }

            let mut timed_out = None;
            if let Some(error) = child.asynchronous_exception() {
                self.handle_caught(error);
                timed_out = Some(false);
            } else if child.timed_out() {
                timed_out = Some(true);
            }

            match timed_out {
                Some(_) => state.remaining.store(0, Ordering::Release),
                None => {
                    let last = state
                        .remaining
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                        == Ok(1);
                    if last {
                        timed_out = Some(false);
                    }
                }
            }
            Ok(timed_out)
        });

        match decided {
            Ok(Some(timed_out)) => self.decide(state, timed_out),
            Ok(None) => {}
            Err(error) => {
                self.handle_caught(error);
                state.remaining.store(0, Ordering::Release);
                force_complete(&state.children);
                self.decide(state, false);
            }
        }
    }

    fn decide(&self, state: &ParallelState, timed_out: bool) {
        tracing::debug!(timed_out, "parallel join decided");
        if timed_out {
            state.child_timed_out.store(true, Ordering::Release);
        }
        state.handle.set();
    }

    pub(crate) fn complete_parallel(&self, state: &ParallelState) {
        if let Some(wait) = state.wait.lock().take() {
            wait.signal(self.timed_out());
        }
        state.handle.close();
        force_complete(&state.children);
    }
}

/// Completes every child run and stops it, dropping its plan's steps now
/// rather than when its in-flight step resolves.
fn force_complete(children: &[Operation]) {
    for child in children {
        if !child.is_completed() {
            child.set_completed();
        }
        child.stop(false);
    }
}
