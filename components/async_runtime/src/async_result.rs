//! Begin/end style asynchronous handles.
//!
//! Older APIs start work with a "begin" call that returns a handle and
//! later collect the outcome with an "end" call on that handle. The handle
//! reports whether the work finished during the begin call and exposes a
//! [`WaitHandle`] that is set on completion.

use crate::runtime::Runtime;
use crate::unwind::guard;
use crate::wait::WaitHandle;
use core_types::AsyncError;
use parking_lot::Mutex;
use std::sync::Arc;

/// A begin/end style handle the scheduler can wait on.
pub trait AsyncHandle: Send + Sync + 'static {
    /// Whether the work has finished.
    fn is_completed(&self) -> bool;

    /// Whether the work finished before the begin call returned.
    fn completed_synchronously(&self) -> bool;

    /// Handle set when the work finishes.
    fn wait_handle(&self) -> WaitHandle;
}

/// Callback invoked with the handle once the work finishes.
pub type AsyncCallback<H> = Box<dyn FnOnce(H) + Send + 'static>;

struct AsyncResultState<T> {
    outcome: Option<Result<T, AsyncError>>,
    completed: bool,
    completed_synchronously: bool,
    ended: bool,
}

struct AsyncResultInner<T> {
    state: Mutex<AsyncResultState<T>>,
    wait: WaitHandle,
}

/// The standard [`AsyncHandle`] implementation.
///
/// # Examples
///
/// ```
/// use async_runtime::{AsyncHandle, AsyncResult};
///
/// let handle = AsyncResult::new();
/// handle.complete_synchronously(Ok(5));
/// assert!(handle.completed_synchronously());
/// assert_eq!(handle.end().unwrap(), 5);
/// ```
pub struct AsyncResult<T> {
    inner: Arc<AsyncResultInner<T>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        AsyncResult {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> Default for AsyncResult<T> {
    fn default() -> Self {
        AsyncResult::new()
    }
}

impl<T: Send + 'static> AsyncResult<T> {
    /// A handle for work that has not finished.
    pub fn new() -> Self {
        AsyncResult {
            inner: Arc::new(AsyncResultInner {
                state: Mutex::new(AsyncResultState {
                    outcome: None,
                    completed: false,
                    completed_synchronously: false,
                    ended: false,
                }),
                wait: WaitHandle::new(),
            }),
        }
    }

    /// Starts `work` on a worker of `runtime`. Once it finishes the handle
    /// completes and `callback`, if any, runs on the same worker.
    pub fn begin<F>(runtime: &Runtime, work: F, callback: Option<AsyncCallback<AsyncResult<T>>>) -> Self
    where
        F: FnOnce() -> Result<T, AsyncError> + Send + 'static,
    {
        let handle = AsyncResult::new();
        let completer = handle.clone();
        let job = Box::new(move || {
            completer.complete(guard(work));
            if let Some(callback) = callback {
                callback(completer);
            }
        });
        if let Err(error) = runtime.spawn(job) {
            handle.complete_synchronously(Err(error));
        }
        handle
    }

    /// Records the outcome of work that finished asynchronously.
    pub fn complete(&self, outcome: Result<T, AsyncError>) -> bool {
        self.finish(outcome, false)
    }

    /// Records the outcome of work that finished during the begin call.
    pub fn complete_synchronously(&self, outcome: Result<T, AsyncError>) -> bool {
        self.finish(outcome, true)
    }

    fn finish(&self, outcome: Result<T, AsyncError>, synchronously: bool) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.completed {
                return false;
            }
            state.outcome = Some(outcome);
            state.completed = true;
            state.completed_synchronously = synchronously;
        }
        self.inner.wait.set();
        true
    }

    /// Blocks until the work finishes and takes its outcome.
    ///
    /// Calling `end` a second time is an `InvalidOperation` error.
    pub fn end(&self) -> Result<T, AsyncError> {
        self.inner.wait.wait();
        let mut state = self.inner.state.lock();
        if state.ended {
            return Err(AsyncError::invalid_operation("end was already called on this handle"));
        }
        state.ended = true;
        state
            .outcome
            .take()
            .unwrap_or_else(|| Err(AsyncError::invalid_operation("the handle has no outcome")))
    }
}

impl<T: Send + 'static> AsyncHandle for AsyncResult<T> {
    fn is_completed(&self) -> bool {
        self.inner.state.lock().completed
    }

    fn completed_synchronously(&self) -> bool {
        self.inner.state.lock().completed_synchronously
    }

    fn wait_handle(&self) -> WaitHandle {
        self.inner.wait.clone()
    }
}

impl<T> std::fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AsyncResult")
            .field("completed", &state.completed)
            .field("completed_synchronously", &state.completed_synchronously)
            .finish()
    }
}
