//! Operations: the nodes a running plan awaits.
//!
//! Every operation carries the same completion state (first captured error,
//! completed, timed out, completed synchronously, timeout) and differs in how
//! it decides when its parent may resume:
//!
//! - *execute* operations complete when signaled through a [`Completer`],
//!   through [`Operation::set_completed`] / [`Operation::set_timed_out`], or
//!   when their timeout elapses. Governing operations of a run are also of
//!   this kind.
//! - *async handle* operations wrap a begin/end [`AsyncHandle`].
//! - *parallel* operations run several plans and join them (see
//!   [`Operation::create_parallel`]).
//!
//! Operations are cheap handles; clones refer to the same operation.

use crate::async_result::AsyncHandle;
use crate::future::Future;
use crate::parallel::ParallelState;
use crate::plan::{ContextHooks, PlanSteps};
use crate::runtime::Runtime;
use crate::wait::{RegisteredWait, WaitCallback, WaitHandle};
use core_types::AsyncError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Callback run once when a plan's run ends.
pub(crate) type DoneCallback = Box<dyn FnOnce(&Operation) + Send + 'static>;

#[derive(Debug)]
pub(crate) struct Flags {
    pub(crate) error: Option<AsyncError>,
    pub(crate) completed: bool,
    pub(crate) timed_out: bool,
    pub(crate) completed_synchronously: bool,
}

/// Driver state of a governing operation.
#[derive(Default)]
pub(crate) struct RunState {
    pub(crate) steps: Option<PlanSteps>,
    pub(crate) current: Option<Operation>,
    pub(crate) done: Option<DoneCallback>,
    pub(crate) finished: bool,
}

#[derive(Default)]
pub(crate) struct ExecuteState {
    /// Outcome once signaled: `Some(true)` for a timeout
    signal: Option<bool>,
    handle: Option<WaitHandle>,
    wait: Option<RegisteredWait>,
}

pub(crate) enum Variant {
    Execute(Mutex<ExecuteState>),
    AsyncHandle {
        handle: Arc<dyn AsyncHandle>,
        wait: Mutex<Option<RegisteredWait>>,
    },
    Parallel(ParallelState),
}

pub(crate) struct OperationInner {
    pub(crate) runtime: Runtime,
    pub(crate) timeout: Duration,
    pub(crate) hooks: Option<ContextHooks>,
    pub(crate) flags: Mutex<Flags>,
    pub(crate) run: Mutex<RunState>,
    pub(crate) variant: Variant,
}

/// A node of a running plan.
#[derive(Clone)]
pub struct Operation {
    pub(crate) inner: Arc<OperationInner>,
}

/// Signals completion of an operation created by
/// [`Operation::create_from_callback`].
#[derive(Clone)]
pub struct Completer {
    operation: Operation,
}

impl Completer {
    /// Marks the action as finished, letting the parent resume.
    pub fn complete(&self) {
        self.operation.signal(false);
    }
}

impl std::fmt::Debug for Completer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Completer")
    }
}

impl Operation {
    pub(crate) fn from_parts(
        runtime: Runtime,
        timeout: Duration,
        hooks: Option<ContextHooks>,
        variant: Variant,
    ) -> Self {
        Operation {
            inner: Arc::new(OperationInner::new(runtime, timeout, hooks, variant)),
        }
    }

    pub(crate) fn from_inner(inner: Arc<OperationInner>) -> Self {
        Operation { inner }
    }

    fn execute(runtime: Runtime, timeout: Duration) -> Self {
        Operation::from_parts(runtime, timeout, None, Variant::Execute(Mutex::default()))
    }

    /// Whether two handles refer to the same operation.
    pub fn ptr_eq(&self, other: &Operation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The runtime this operation schedules on.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// How long a parent waits for this operation.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Whether the operation has completed (normally or by timing out).
    pub fn is_completed(&self) -> bool {
        self.inner.flags.lock().completed
    }

    /// Whether the operation timed out.
    pub fn timed_out(&self) -> bool {
        self.inner.flags.lock().timed_out
    }

    /// Whether the operation completed without ever waiting asynchronously.
    pub fn completed_synchronously(&self) -> bool {
        let flags = self.inner.flags.lock();
        flags.completed && flags.completed_synchronously
    }

    /// The first error captured by this operation, if any.
    pub fn asynchronous_exception(&self) -> Option<AsyncError> {
        self.inner.flags.lock().error.clone()
    }

    /// Re-raises the captured error, if any.
    pub fn end(&self) -> Result<(), AsyncError> {
        match self.asynchronous_exception() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Completes the operation normally.
    pub fn set_completed(&self) {
        self.finish(false);
    }

    /// Completes the operation as timed out.
    pub fn set_timed_out(&self) {
        self.finish(true);
    }

    /// A bare operation completed externally through
    /// [`set_completed`](Self::set_completed) or
    /// [`set_timed_out`](Self::set_timed_out), or by its timeout.
    pub fn create(&self, timeout: Duration) -> Operation {
        Operation::execute(self.inner.runtime.clone(), timeout)
    }

    /// An operation that runs `action` immediately and completes when the
    /// action calls [`Completer::complete`].
    ///
    /// If the action has already completed when the parent awaits it, the
    /// parent resumes without registering a wait.
    pub fn create_from_callback<F>(&self, action: F, timeout: Duration) -> Operation
    where
        F: FnOnce(Completer),
    {
        let operation = self.create(timeout);
        action(Completer {
            operation: operation.clone(),
        });
        operation
    }

    /// An operation that completes when `future` completes, whatever the
    /// outcome.
    pub fn create_from_future<T: Send + 'static>(
        &self,
        future: &Future<T>,
        timeout: Duration,
    ) -> Operation {
        self.create_from_callback(
            |completer| {
                future.on_complete(move |_| completer.complete());
            },
            timeout,
        )
    }

    /// An operation that completes when a begin/end handle completes.
    pub fn create_from_async_handle<H: AsyncHandle>(&self, handle: H, timeout: Duration) -> Operation {
        Operation::from_parts(
            self.inner.runtime.clone(),
            timeout,
            None,
            Variant::AsyncHandle {
                handle: Arc::new(handle),
                wait: Mutex::new(None),
            },
        )
    }

    /// Arranges for `callback` to run once this operation completes or its
    /// timeout elapses. Runs it immediately if the operation has already
    /// completed.
    pub(crate) fn yield_to(&self, callback: WaitCallback) -> Result<(), AsyncError> {
        match &self.inner.variant {
            Variant::Execute(state) => self.yield_execute(state, callback),
            Variant::AsyncHandle { handle, wait } => {
                if handle.completed_synchronously() {
                    callback(false);
                    return Ok(());
                }
                self.inner.flags.lock().completed_synchronously = false;
                let registered = self.inner.runtime.register_wait(
                    &handle.wait_handle(),
                    self.inner.timeout,
                    callback,
                )?;
                let timed_out = {
                    let flags = self.inner.flags.lock();
                    flags.completed.then_some(flags.timed_out)
                };
                match timed_out {
                    Some(timed_out) => {
                        registered.signal(timed_out);
                    }
                    None => *wait.lock() = Some(registered),
                }
                Ok(())
            }
            Variant::Parallel(parallel) => self.yield_parallel(parallel, callback),
        }
    }

    fn yield_execute(&self, state: &Mutex<ExecuteState>, callback: WaitCallback) -> Result<(), AsyncError> {
        let handle = {
            let mut state = state.lock();
            match state.signal {
                Some(timed_out) => {
                    drop(state);
                    callback(timed_out);
                    return Ok(());
                }
                None => {
                    let handle = WaitHandle::new();
                    state.handle = Some(handle.clone());
                    handle
                }
            }
        };

        self.inner.flags.lock().completed_synchronously = false;
        let registered = self
            .inner
            .runtime
            .register_wait(&handle, self.inner.timeout, callback)?;

        let mut state = state.lock();
        match state.signal {
            Some(timed_out) => {
                drop(state);
                registered.signal(timed_out);
                handle.close();
            }
            None => state.wait = Some(registered),
        }
        Ok(())
    }

    /// Signals an execute operation without completing it.
    fn signal(&self, timed_out: bool) {
        let Variant::Execute(state) = &self.inner.variant else {
            return;
        };
        let handle = {
            let mut state = state.lock();
            if state.signal.is_some() {
                return;
            }
            state.signal = Some(timed_out);
            state.handle.clone()
        };
        if let Some(handle) = handle {
            handle.set();
        }
    }

    /// Marks the operation complete. Returns `false` if it already was.
    pub(crate) fn finish(&self, timed_out: bool) -> bool {
        {
            let mut flags = self.inner.flags.lock();
            if flags.completed {
                flags.timed_out |= timed_out;
                return false;
            }
            flags.completed = true;
            flags.timed_out = timed_out;
        }
        self.on_completion(timed_out);
        true
    }

    /// Releases the operation's waitable resources and disarms any pending
    /// wait, which resumes the parent with the same outcome.
    fn on_completion(&self, timed_out: bool) {
        match &self.inner.variant {
            Variant::Execute(state) => {
                let (outcome, handle, wait) = {
                    let mut state = state.lock();
                    let outcome = *state.signal.get_or_insert(timed_out);
                    (outcome, state.handle.clone(), state.wait.take())
                };
                match wait {
                    Some(wait) => {
                        wait.signal(outcome);
                        if let Some(handle) = handle {
                            handle.close();
                        }
                    }
                    // a registration in progress observes the signal itself
                    None => {
                        if let (Some(handle), false) = (handle, outcome) {
                            handle.set();
                        }
                    }
                }
            }
            Variant::AsyncHandle { handle, wait } => {
                if let Some(wait) = wait.lock().take() {
                    wait.signal(timed_out);
                }
                if !handle.completed_synchronously() {
                    handle.wait_handle().close();
                }
            }
            Variant::Parallel(parallel) => self.complete_parallel(parallel),
        }
    }

    /// Captures `error` unless an earlier error was already captured.
    pub(crate) fn handle_caught(&self, error: AsyncError) {
        let mut flags = self.inner.flags.lock();
        match &flags.error {
            None => flags.error = Some(error),
            Some(first) => {
                tracing::warn!(%error, first = %first, "dropping secondary operation error");
            }
        }
    }

    /// Captures `error`, replacing any earlier one.
    pub(crate) fn override_error(&self, error: AsyncError) {
        let mut flags = self.inner.flags.lock();
        if let Some(previous) = flags.error.replace(error) {
            tracing::warn!(error = %previous, "plan error superseded by disposal error");
        }
    }
}

impl OperationInner {
    pub(crate) fn new(
        runtime: Runtime,
        timeout: Duration,
        hooks: Option<ContextHooks>,
        variant: Variant,
    ) -> Self {
        OperationInner {
            runtime,
            timeout,
            hooks,
            flags: Mutex::new(Flags {
                error: None,
                completed: false,
                timed_out: false,
                completed_synchronously: true,
            }),
            run: Mutex::new(RunState::default()),
            variant,
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flags = self.inner.flags.lock();
        let kind = match &self.inner.variant {
            Variant::Execute(_) => "execute",
            Variant::AsyncHandle { .. } => "async_handle",
            Variant::Parallel(_) => "parallel",
        };
        f.debug_struct("Operation")
            .field("kind", &kind)
            .field("completed", &flags.completed)
            .field("timed_out", &flags.timed_out)
            .field("error", &flags.error)
            .finish()
    }
}
