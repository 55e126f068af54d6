//! Single-assignment futures.
//!
//! A [`Promise`] is the write side and a [`Future`] the read side of one
//! shared cell. The cell completes exactly once, as a success, a failure
//! or a cancellation; every later completion attempt is ignored.
//!
//! # Callbacks
//!
//! Completion callbacks registered before completion run in registration
//! order on the completing thread, after the state lock has been released.
//! Callbacks registered after completion run immediately on the
//! registering thread. A panicking callback does not prevent later ones from
//! running; the first panic is resumed once all of them have run.
//!
//! # Examples
//!
//! ```
//! use async_runtime::{FutureStatus, Promise};
//!
//! let promise = Promise::new();
//! let future = promise.future();
//! assert_eq!(future.status(), FutureStatus::Incomplete);
//!
//! promise.set_result(10);
//! assert_eq!(future.result().unwrap(), 10);
//! ```

use crate::unwind;
use core_types::AsyncError;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Completion state of a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FutureStatus {
    /// Not completed yet
    Incomplete = 0,
    /// Completed with a result
    Success = 1,
    /// Completed with an error
    Failure = 2,
    /// Canceled by a consumer
    Canceled = 3,
}

impl FutureStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => FutureStatus::Success,
            2 => FutureStatus::Failure,
            3 => FutureStatus::Canceled,
            _ => FutureStatus::Incomplete,
        }
    }

    /// Whether this is a terminal state.
    pub fn is_complete(self) -> bool {
        self != FutureStatus::Incomplete
    }
}

type Callback<T> = Box<dyn FnOnce(&Future<T>) + Send + 'static>;

struct State<T> {
    value: Option<T>,
    error: Option<AsyncError>,
    callbacks: Vec<Callback<T>>,
    waiters: usize,
}

struct Shared<T> {
    /// Written last, after the value or error, while holding `state`
    status: AtomicU8,
    state: Mutex<State<T>>,
    completed: Condvar,
}

/// Read side of a single-assignment cell.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            shared: self.shared.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("status", &self.status())
            .finish()
    }
}

impl<T> Future<T> {
    /// Current status. Never blocks.
    pub fn status(&self) -> FutureStatus {
        FutureStatus::from_u8(self.shared.status.load(Ordering::Acquire))
    }

    /// Whether the future has completed in any way.
    pub fn is_complete(&self) -> bool {
        self.status().is_complete()
    }

    /// Whether the future was canceled.
    pub fn is_canceled(&self) -> bool {
        self.status() == FutureStatus::Canceled
    }

    /// Whether two futures share the same cell.
    pub fn ptr_eq(&self, other: &Future<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Number of threads currently blocked in [`wait`](Self::wait).
    pub fn waiter_count(&self) -> usize {
        self.shared.state.lock().waiters
    }
}

impl<T: Send + 'static> Future<T> {
    fn incomplete() -> Self {
        Future {
            shared: Arc::new(Shared {
                status: AtomicU8::new(FutureStatus::Incomplete as u8),
                state: Mutex::new(State {
                    value: None,
                    error: None,
                    callbacks: Vec::new(),
                    waiters: 0,
                }),
                completed: Condvar::new(),
            }),
        }
    }

    /// A future already completed with `value`.
    pub fn ready(value: T) -> Self {
        let future = Future::incomplete();
        future.set_result(value);
        future
    }

    /// A future already failed with `error`.
    pub fn failed(error: AsyncError) -> Self {
        let future = Future::incomplete();
        future.set_error(error);
        future
    }

    /// A future already completed from `result`.
    pub fn from_result(result: Result<T, AsyncError>) -> Self {
        match result {
            Ok(value) => Future::ready(value),
            Err(error) => Future::failed(error),
        }
    }

    /// Blocks until the future completes.
    pub fn wait(&self) {
        if self.is_complete() {
            return;
        }
        let mut state = self.shared.state.lock();
        while !self.is_complete() {
            state.waiters += 1;
            self.shared.completed.wait(&mut state);
            state.waiters -= 1;
        }
    }

    /// Blocks until the future completes or `timeout` elapses. Returns
    /// whether the future is complete.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_complete() {
            return true;
        }
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut state = self.shared.state.lock();
        while !self.is_complete() {
            state.waiters += 1;
            let expired = self
                .shared
                .completed
                .wait_until(&mut state, deadline)
                .timed_out();
            state.waiters -= 1;
            if expired {
                break;
            }
        }
        self.is_complete()
    }

    /// Blocks until complete, then reports whether the future failed.
    pub fn has_error(&self) -> bool {
        self.wait();
        self.status() == FutureStatus::Failure
    }

    /// Blocks until complete, then reports whether the future succeeded.
    pub fn has_result(&self) -> bool {
        self.wait();
        self.status() == FutureStatus::Success
    }

    /// Blocks until complete, then returns the error of a failed future.
    pub fn error(&self) -> Option<AsyncError> {
        self.wait();
        self.failure()
    }

    /// The error of a failed future, without blocking.
    pub(crate) fn failure(&self) -> Option<AsyncError> {
        if self.status() != FutureStatus::Failure {
            return None;
        }
        self.shared.state.lock().error.clone()
    }

    /// Cancels the future. Returns `false` if it had already completed.
    pub fn cancel(&self) -> bool {
        self.complete(FutureStatus::Canceled, None, None)
    }

    /// Runs `callback` once the future completes.
    ///
    /// If the future is already complete the callback runs immediately on
    /// the calling thread.
    pub fn on_complete<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Future<T>) + Send + 'static,
    {
        if !self.is_complete() {
            let mut state = self.shared.state.lock();
            if !self.is_complete() {
                state.callbacks.push(Box::new(callback));
                return self;
            }
        }
        callback(self);
        self
    }

    /// Runs `callback` with the error if the future fails.
    pub fn on_error<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(AsyncError) + Send + 'static,
    {
        self.on_complete(move |future| {
            if let Some(error) = future.failure() {
                callback(error);
            }
        })
    }

    /// Runs `callback` if the future is canceled.
    pub fn on_cancel<F>(&self, callback: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete(move |future| {
            if future.is_canceled() {
                callback();
            }
        })
    }

    /// A type-erased handle to this future.
    pub fn handle(&self) -> FutureHandle {
        FutureHandle::from(self.clone())
    }

    pub(crate) fn set_result(&self, value: T) -> bool {
        self.complete(FutureStatus::Success, Some(value), None)
    }

    pub(crate) fn set_error(&self, error: AsyncError) -> bool {
        self.complete(FutureStatus::Failure, None, Some(error))
    }

    fn complete(&self, status: FutureStatus, value: Option<T>, error: Option<AsyncError>) -> bool {
        let callbacks = {
            let mut state = self.shared.state.lock();
            if self.is_complete() {
                return false;
            }
            state.value = value;
            state.error = error;
            self.shared.status.store(status as u8, Ordering::Release);
            if state.waiters > 0 {
                self.shared.completed.notify_all();
            }
            std::mem::take(&mut state.callbacks)
        };

        unwind::run_all(callbacks, |callback| callback(self));
        true
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Blocks until complete, then returns the result or the error.
    ///
    /// Reading a canceled future is an `InvalidOperation` error.
    pub fn result(&self) -> Result<T, AsyncError> {
        self.wait();
        self.outcome()
    }

    /// The outcome of a completed future, without blocking.
    pub(crate) fn outcome(&self) -> Result<T, AsyncError> {
        let state = self.shared.state.lock();
        match self.status() {
            FutureStatus::Success => state
                .value
                .clone()
                .ok_or_else(|| AsyncError::invalid_operation("future has no stored result")),
            FutureStatus::Failure => Err(state
                .error
                .clone()
                .unwrap_or_else(|| AsyncError::application("unknown error"))),
            FutureStatus::Canceled => {
                Err(AsyncError::invalid_operation("the future was canceled"))
            }
            FutureStatus::Incomplete => {
                Err(AsyncError::invalid_operation("the future has not completed"))
            }
        }
    }

    /// Runs `callback` with the result if the future succeeds.
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.on_complete(move |future| {
            if future.status() == FutureStatus::Success {
                if let Ok(value) = future.outcome() {
                    callback(value);
                }
            }
        })
    }
}

/// Write side of a single-assignment cell.
///
/// Cloning a promise yields another publisher for the same cell.
pub struct Promise<T> {
    future: Future<T>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            future: self.future.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.future.status())
            .finish()
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Promise::new()
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Creates an incomplete cell.
    pub fn new() -> Self {
        Promise {
            future: Future::incomplete(),
        }
    }

    /// The read side of this cell.
    pub fn future(&self) -> Future<T> {
        self.future.clone()
    }

    /// Completes the cell with `value`. Returns `false` if it was already
    /// complete.
    pub fn set_result(&self, value: T) -> bool {
        self.future.set_result(value)
    }

    /// Fails the cell with `error`. Returns `false` if it was already
    /// complete.
    pub fn set_error(&self, error: AsyncError) -> bool {
        self.future.set_error(error)
    }

    /// Completes the cell from `result`.
    pub fn complete_with(&self, result: Result<T, AsyncError>) -> bool {
        match result {
            Ok(value) => self.set_result(value),
            Err(error) => self.set_error(error),
        }
    }

    /// Whether the cell has completed.
    pub fn is_complete(&self) -> bool {
        self.future.is_complete()
    }

    /// Runs `callback` if a consumer cancels the cell.
    pub fn on_cancel<F>(&self, callback: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.future.on_cancel(callback);
        self
    }
}

/// Object-safe view of a future with its value type erased.
trait ErasedFuture: Send + Sync {
    fn status(&self) -> FutureStatus;
    fn wait(&self);
    fn failure(&self) -> Option<AsyncError>;
    fn subscribe(&self, callback: Box<dyn FnOnce() + Send>);
    fn cancel(&self) -> bool;
}

impl<T: Send + 'static> ErasedFuture for Future<T> {
    fn status(&self) -> FutureStatus {
        Future::status(self)
    }

    fn wait(&self) {
        Future::wait(self)
    }

    fn failure(&self) -> Option<AsyncError> {
        Future::failure(self)
    }

    fn subscribe(&self, callback: Box<dyn FnOnce() + Send>) {
        self.on_complete(move |_| callback());
    }

    fn cancel(&self) -> bool {
        Future::cancel(self)
    }
}

/// A future of any value type.
///
/// Used wherever only completion and failure matter, such as the items of a
/// sequential iterator.
#[derive(Clone)]
pub struct FutureHandle {
    inner: Arc<dyn ErasedFuture>,
}

impl FutureHandle {
    /// A handle that is already successfully complete.
    pub fn complete() -> FutureHandle {
        static COMPLETE: OnceLock<FutureHandle> = OnceLock::new();
        COMPLETE.get_or_init(|| Future::ready(()).handle()).clone()
    }

    /// Current status. Never blocks.
    pub fn status(&self) -> FutureStatus {
        self.inner.status()
    }

    /// Whether the future has completed in any way.
    pub fn is_complete(&self) -> bool {
        self.status().is_complete()
    }

    /// Whether the future was canceled.
    pub fn is_canceled(&self) -> bool {
        self.status() == FutureStatus::Canceled
    }

    /// Blocks until the future completes.
    pub fn wait(&self) {
        self.inner.wait()
    }

    /// Blocks until complete, then reports whether the future failed.
    pub fn has_error(&self) -> bool {
        self.wait();
        self.status() == FutureStatus::Failure
    }

    /// Blocks until complete, then returns the error of a failed future.
    pub fn error(&self) -> Option<AsyncError> {
        self.wait();
        self.inner.failure()
    }

    pub(crate) fn failure(&self) -> Option<AsyncError> {
        self.inner.failure()
    }

    /// Runs `callback` once the future completes.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.subscribe(Box::new(callback))
    }

    /// Cancels the underlying future.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }
}

impl<T: Send + 'static> From<Future<T>> for FutureHandle {
    fn from(future: Future<T>) -> Self {
        FutureHandle {
            inner: Arc::new(future),
        }
    }
}

impl<T: Send + 'static> From<&Future<T>> for FutureHandle {
    fn from(future: &Future<T>) -> Self {
        FutureHandle::from(future.clone())
    }
}

impl std::fmt::Debug for FutureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FutureHandle")
            .field("status", &self.status())
            .finish()
    }
}
