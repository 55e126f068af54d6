//! Execution plans and context hooks.
//!
//! An execution plan is a function from the governing [`Operation`] to a
//! lazy sequence of steps. Each step yields a child operation (created from
//! the governing operation's factories) that the scheduler awaits before
//! pulling the next step. Returning `Err` from a step, or panicking while
//! producing one, ends the run with that error. Dropping the sequence is its
//! disposal; a panic raised while dropping it takes priority over any
//! earlier error.
//!
//! # Examples
//!
//! ```
//! use async_runtime::{Operation, Plan, PlanStep};
//! use std::time::Duration;
//!
//! let plan = Plan::new(|op: &Operation| {
//!     let op = op.clone();
//!     (0..3).map(move |_| -> PlanStep {
//!         let step = op.create(Duration::from_secs(1));
//!         step.set_completed();
//!         Ok(step)
//!     })
//! });
//! # let _ = plan;
//! ```

use crate::operation::Operation;
use core_types::AsyncError;
use std::sync::Arc;

/// One element of a plan: the next child operation, or the error that ends
/// the run.
pub type PlanStep = Result<Operation, AsyncError>;

/// The resumable sequence produced by a plan.
pub type PlanSteps = Box<dyn Iterator<Item = PlanStep> + Send + 'static>;

/// Something that can produce the steps of a run.
///
/// Implemented for every `FnOnce(&Operation) -> impl IntoIterator<Item =
/// PlanStep>` closure.
pub trait ExecutionPlan: Send + 'static {
    /// Produces the steps of one run governed by `operation`.
    fn steps(self, operation: &Operation) -> PlanSteps;
}

impl<F, I> ExecutionPlan for F
where
    F: FnOnce(&Operation) -> I + Send + 'static,
    I: IntoIterator<Item = PlanStep>,
    I::IntoIter: Send + 'static,
{
    fn steps(self, operation: &Operation) -> PlanSteps {
        Box::new(self(operation).into_iter())
    }
}

/// A boxed execution plan, for collections of plans of different types.
pub struct Plan {
    build: Box<dyn FnOnce(&Operation) -> PlanSteps + Send + 'static>,
}

impl Plan {
    /// Boxes `plan`.
    pub fn new(plan: impl ExecutionPlan) -> Self {
        Plan {
            build: Box::new(move |operation| plan.steps(operation)),
        }
    }
}

impl ExecutionPlan for Plan {
    fn steps(self, operation: &Operation) -> PlanSteps {
        (self.build)(operation)
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Plan")
    }
}

/// A context hook run around plan resumptions.
pub type Hook = Arc<dyn Fn() -> Result<(), AsyncError> + Send + Sync + 'static>;

/// Hooks run immediately before and after every resumption of a plan, and
/// around its done-callback.
///
/// Errors from either hook are captured like plan errors; a failing enter
/// hook does not stop the exit hook from running.
#[derive(Clone)]
pub struct ContextHooks {
    pub(crate) enter: Hook,
    pub(crate) exit: Hook,
}

impl ContextHooks {
    /// Creates a hook pair.
    pub fn new<E, X>(enter: E, exit: X) -> Self
    where
        E: Fn() -> Result<(), AsyncError> + Send + Sync + 'static,
        X: Fn() -> Result<(), AsyncError> + Send + Sync + 'static,
    {
        ContextHooks {
            enter: Arc::new(enter),
            exit: Arc::new(exit),
        }
    }

    /// Builds hooks from optional halves. Both or neither must be given.
    pub fn from_parts(enter: Option<Hook>, exit: Option<Hook>) -> Result<Option<Self>, AsyncError> {
        match (enter, exit) {
            (Some(enter), Some(exit)) => Ok(Some(ContextHooks { enter, exit })),
            (None, None) => Ok(None),
            _ => Err(AsyncError::invalid_argument(
                "context hooks must be supplied as an enter/exit pair",
            )),
        }
    }
}

impl std::fmt::Debug for ContextHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContextHooks")
    }
}
