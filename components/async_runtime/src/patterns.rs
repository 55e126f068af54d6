//! Bridges from other asynchronous styles into futures.

use crate::async_result::AsyncCallback;
use crate::future::{Future, FutureHandle, Promise};
use crate::operation::Operation;
use crate::plan::PlanStep;
use crate::runtime::Runtime;
use crate::sequential::execute_sequentially;
use crate::unwind::guard;
use core_types::AsyncError;

impl<T: Send + 'static> Future<T> {
    /// Wraps a begin/end pair.
    ///
    /// `begin` starts the work and must arrange for the supplied callback to
    /// be called with the handle once the work finishes; `end` then turns the
    /// handle into the result. Errors from either become the future's error.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_runtime::{AsyncResult, Future, Runtime};
    ///
    /// let runtime = Runtime::global().clone();
    /// let future = Future::from_async_pattern(
    ///     move |callback| {
    ///         AsyncResult::begin(&runtime, || Ok(6 * 7), Some(callback));
    ///         Ok(())
    ///     },
    ///     |handle: AsyncResult<i32>| handle.end(),
    /// );
    /// assert_eq!(future.result().unwrap(), 42);
    /// ```
    pub fn from_async_pattern<H, B, E>(begin: B, end: E) -> Future<T>
    where
        H: Send + 'static,
        B: FnOnce(AsyncCallback<H>) -> Result<(), AsyncError>,
        E: FnOnce(H) -> Result<T, AsyncError> + Send + 'static,
    {
        let promise = Promise::new();
        let result = promise.future();

        let publisher = promise.clone();
        let callback: AsyncCallback<H> = Box::new(move |handle| {
            publisher.complete_with(guard(|| end(handle)));
        });
        if let Err(error) = guard(|| begin(callback)) {
            promise.set_error(error);
        }
        result
    }

    /// Drives the futures produced by `pattern` one at a time. The pattern
    /// publishes the final value through the promise it receives.
    ///
    /// With `stop_on_error`, the first failed item fails the result. If the
    /// sequence ends without anything published, the result fails.
    pub fn from_iterator_pattern<F, I>(pattern: F, stop_on_error: bool) -> Future<T>
    where
        F: FnOnce(Promise<T>) -> I,
        I: IntoIterator,
        I::Item: Into<FutureHandle>,
        I::IntoIter: Send + 'static,
    {
        let publisher = Promise::new();
        let result = publisher.future();

        let steps = match guard(|| Ok(pattern(publisher.clone()))) {
            Ok(steps) => steps,
            Err(error) => {
                publisher.set_error(error);
                return result;
            }
        };

        execute_sequentially(steps, stop_on_error).on_complete(move |sequence| {
            if publisher.is_complete() {
                return;
            }
            let error = sequence.failure().unwrap_or_else(|| {
                AsyncError::invalid_operation(
                    "The iterator pattern completed without publishing a result.",
                )
            });
            publisher.set_error(error);
        });
        result
    }

    /// Runs an execution plan on the global runtime and publishes its result
    /// through a future.
    ///
    /// See [`from_operation_pattern_on`](Self::from_operation_pattern_on).
    pub fn from_operation_pattern<F, I>(pattern: F) -> Future<T>
    where
        F: FnOnce(&Operation, Promise<T>) -> I + Send + 'static,
        I: IntoIterator<Item = PlanStep>,
        I::IntoIter: Send + 'static,
    {
        Future::from_operation_pattern_on(Runtime::global(), pattern)
    }

    /// Runs an execution plan that publishes its result through the promise
    /// it receives.
    ///
    /// The future fails if the run captures an error, times out, or ends
    /// without publishing anything.
    pub fn from_operation_pattern_on<F, I>(runtime: &Runtime, pattern: F) -> Future<T>
    where
        F: FnOnce(&Operation, Promise<T>) -> I + Send + 'static,
        I: IntoIterator<Item = PlanStep>,
        I::IntoIter: Send + 'static,
    {
        let publisher = Promise::new();
        let result = publisher.future();
        let name = std::any::type_name::<F>();

        let plan_publisher = publisher.clone();
        runtime.start(
            move |operation: &Operation| pattern(operation, plan_publisher),
            move |run: &Operation| {
                if let Some(error) = run.asynchronous_exception() {
                    publisher.set_error(error);
                } else if run.timed_out() {
                    publisher.set_error(AsyncError::timeout(format!(
                        "The operation - '{name}' timed-out."
                    )));
                } else if !publisher.is_complete() {
                    publisher.set_error(AsyncError::invalid_operation(format!(
                        "The operation - '{name}' exited without publishing a result."
                    )));
                }
            },
        );
        result
    }
}
