//! The plan driver.
//!
//! A run advances its plan one step at a time. Each step yields a child
//! operation; the run resumes when the child completes or times out. A
//! child that is already complete resumes the run synchronously, on the
//! same stack, so a per-thread depth counter bounds how many synchronous
//! resumptions may nest before the next step is handed to a worker.
//!
//! A run ends when the plan is exhausted, when a step fails, or when a child
//! times out. In every case the plan's steps are dropped before the
//! done-callback fires, and the done-callback fires exactly once.

use crate::operation::{DoneCallback, Operation, Variant};
use crate::plan::{ContextHooks, ExecutionPlan, PlanSteps};
use crate::runtime::Runtime;
use crate::unwind::guard;
use core_types::AsyncError;
use parking_lot::Mutex;
use std::cell::Cell;
use std::time::Duration;

thread_local! {
    static SYNCHRONOUS_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        SYNCHRONOUS_DEPTH.with(|depth| depth.set(depth.get() + 1));
        DepthGuard
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        SYNCHRONOUS_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

impl Runtime {
    /// Starts running `plan`. `done` runs once when the run ends.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_runtime::{Operation, PlanStep, Runtime, RuntimeConfig};
    /// use crossbeam::channel;
    /// use std::time::Duration;
    ///
    /// let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    /// let (tx, rx) = channel::bounded(1);
    /// runtime.start(
    ///     |op: &Operation| {
    ///         let step = op.create(Duration::from_millis(10));
    ///         vec![PlanStep::Ok(step)]
    ///     },
    ///     move |run: &Operation| tx.send(run.timed_out()).unwrap(),
    /// );
    /// assert!(rx.recv().unwrap());
    /// ```
    pub fn start<P, D>(&self, plan: P, done: D) -> Operation
    where
        P: ExecutionPlan,
        D: FnOnce(&Operation) + Send + 'static,
    {
        self.start_run(plan, Box::new(done), None)
    }

    /// Like [`start`](Self::start), running `hooks` around every resumption
    /// of the plan and around `done`.
    pub fn start_with_hooks<P, D>(&self, plan: P, done: D, hooks: ContextHooks) -> Operation
    where
        P: ExecutionPlan,
        D: FnOnce(&Operation) + Send + 'static,
    {
        self.start_run(plan, Box::new(done), Some(hooks))
    }

    fn start_run<P: ExecutionPlan>(
        &self,
        plan: P,
        done: DoneCallback,
        hooks: Option<ContextHooks>,
    ) -> Operation {
        let run = Operation::governing(self.clone(), hooks, done);
        tracing::debug!("starting execution plan");
        run.launch(plan);
        run
    }
}

impl Operation {
    /// Starts `plan` on the global runtime.
    pub fn start<P, D>(plan: P, done: D) -> Operation
    where
        P: ExecutionPlan,
        D: FnOnce(&Operation) + Send + 'static,
    {
        Runtime::global().start(plan, done)
    }

    /// Starts `plan` on the global runtime with context hooks.
    pub fn start_with_hooks<P, D>(plan: P, done: D, hooks: ContextHooks) -> Operation
    where
        P: ExecutionPlan,
        D: FnOnce(&Operation) + Send + 'static,
    {
        Runtime::global().start_with_hooks(plan, done, hooks)
    }

    /// A governing operation for one run.
    pub(crate) fn governing(
        runtime: Runtime,
        hooks: Option<ContextHooks>,
        done: DoneCallback,
    ) -> Operation {
        let run = Operation::from_parts(
            runtime,
            Duration::MAX,
            hooks,
            Variant::Execute(Mutex::default()),
        );
        run.inner.run.lock().done = Some(done);
        run
    }

    /// Produces the plan's steps and begins advancing them on this thread.
    pub(crate) fn launch<P: ExecutionPlan>(&self, plan: P) {
        match self.install(plan) {
            Ok(()) => self.begin_next_step(),
            Err(error) => {
                self.handle_caught(error);
                self.stop(false);
            }
        }
    }

    /// Produces the plan's steps and queues the first advance on a worker.
    pub(crate) fn launch_queued<P: ExecutionPlan>(&self, plan: P) -> Result<(), AsyncError> {
        match self.install(plan) {
            Ok(()) => self.queue_next_step(),
            Err(error) => {
                self.handle_caught(error);
                let run = self.clone();
                self.inner.runtime.spawn(Box::new(move || run.stop(false)))
            }
        }
    }

    fn install<P: ExecutionPlan>(&self, plan: P) -> Result<(), AsyncError> {
        let steps: PlanSteps = guard(|| Ok(plan.steps(self)))?;
        self.store_steps(steps);
        Ok(())
    }

    /// Hands `steps` back to the run, or drops them if the run was stopped
    /// while they were out.
    fn store_steps(&self, steps: PlanSteps) {
        let stale = {
            let mut run = self.inner.run.lock();
            if run.finished {
                Some(steps)
            } else {
                run.steps = Some(steps);
                None
            }
        };
        if let Some(steps) = stale {
            self.drop_steps(steps);
        }
    }

    fn drop_steps(&self, steps: PlanSteps) {
        if let Err(error) = guard(|| {
            drop(steps);
            Ok(())
        }) {
            self.override_error(error);
        }
    }

    pub(crate) fn queue_next_step(&self) -> Result<(), AsyncError> {
        let run = self.clone();
        self.inner
            .runtime
            .spawn(Box::new(move || run.begin_next_step()))
    }

    fn begin_next_step(&self) {
        if self.is_completed() {
            // force-completed from outside the run
            self.stop(false);
            return;
        }

        let depth = SYNCHRONOUS_DEPTH.with(Cell::get);
        if depth > self.inner.runtime.config().max_synchronous_depth {
            tracing::trace!(depth, "handing next plan step to a worker");
            if let Err(error) = self.queue_next_step() {
                self.handle_caught(error);
                self.stop(false);
            }
            return;
        }

        let _depth = DepthGuard::enter();
        match self.advance() {
            Ok(true) => {}
            Ok(false) => self.stop(false),
            Err(error) => {
                self.handle_caught(error);
                self.stop(false);
            }
        }
    }

    /// Pulls the next step and awaits it. Returns `Ok(false)` when the plan
    /// is exhausted.
    fn advance(&self) -> Result<bool, AsyncError> {
        let Some(child) = self.next_step()? else {
            return Ok(false);
        };
        if child.ptr_eq(self) {
            return Err(AsyncError::invalid_operation(
                "an operation cannot yield itself",
            ));
        }

        tracing::trace!(?child, "awaiting child operation");
        self.inner.run.lock().current = Some(child.clone());
        let run = self.clone();
        guard(|| child.yield_to(Box::new(move |timed_out| run.child_finished(timed_out))))?;
        Ok(true)
    }

    fn next_step(&self) -> Result<Option<Operation>, AsyncError> {
        let Some(mut steps) = self.inner.run.lock().steps.take() else {
            return Ok(None);
        };

        self.enter_context();
        let next = guard(|| Ok(steps.next()));
        self.store_steps(steps);
        self.exit_context();

        next?.transpose()
    }

    fn child_finished(&self, timed_out: bool) {
        let Some(child) = self.inner.run.lock().current.take() else {
            return;
        };

        let child_synchronous = child.inner.flags.lock().completed_synchronously;
        if !child_synchronous {
            self.inner.flags.lock().completed_synchronously = false;
        }
        child.finish(timed_out);

        if timed_out {
            tracing::debug!(timeout = ?child.timeout(), "child operation timed out");
            self.stop(true);
        } else {
            self.begin_next_step();
        }
    }

    /// Ends the run: completes the operation, drops the plan's steps and
    /// fires the done-callback. Only the first call has any effect.
    pub(crate) fn stop(&self, timed_out: bool) {
        let (steps, done) = {
            let mut run = self.inner.run.lock();
            if run.finished {
                return;
            }
            run.finished = true;
            run.current = None;
            (run.steps.take(), run.done.take())
        };

        self.finish(timed_out);

        if let Some(steps) = steps {
            self.drop_steps(steps);
        }

        tracing::debug!(
            timed_out = self.timed_out(),
            failed = self.asynchronous_exception().is_some(),
            "execution plan stopped"
        );

        if let Some(done) = done {
            self.enter_context();
            if let Err(error) = guard(|| {
                done(self);
                Ok(())
            }) {
                tracing::error!(%error, "completion callback panicked");
            }
            self.exit_context();
        }
    }

    fn enter_context(&self) {
        if let Some(hooks) = &self.inner.hooks {
            let enter = hooks.enter.clone();
            if let Err(error) = guard(|| enter()) {
                tracing::warn!(%error, "context enter hook failed");
                self.handle_caught(error);
            }
        }
    }

    fn exit_context(&self) {
        if let Some(hooks) = &self.inner.hooks {
            let exit = hooks.exit.clone();
            if let Err(error) = guard(|| exit()) {
                tracing::warn!(%error, "context exit hook failed");
                self.handle_caught(error);
            }
        }
    }
}
