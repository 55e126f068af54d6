//! Waitable handles and registered waits.
//!
//! A [`WaitHandle`] is a manual-reset event. [`Runtime::register_wait`]
//! arranges for a callback to run on the worker pool exactly once, either
//! when the handle is set (`timed_out == false`) or when the timeout
//! elapses first (`timed_out == true`).
//!
//! [`Runtime::register_wait`]: crate::Runtime::register_wait

use crate::pool::Executor;
use crate::timer::TimerHandle;
use core_types::AsyncError;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Callback of a registered wait; receives `true` when the wait timed out.
pub type WaitCallback = Box<dyn FnOnce(bool) + Send + 'static>;

#[derive(Default)]
struct WaitState {
    signaled: bool,
    closed: bool,
    registrations: Vec<Arc<Registration>>,
}

#[derive(Default)]
struct WaitInner {
    state: Mutex<WaitState>,
    signal: Condvar,
}

/// Manual-reset event.
#[derive(Clone, Default)]
pub struct WaitHandle {
    inner: Arc<WaitInner>,
}

impl WaitHandle {
    /// Creates an unsignaled handle.
    pub fn new() -> Self {
        WaitHandle::default()
    }

    /// Signals the handle, waking blocked threads and firing registered waits.
    pub fn set(&self) {
        let registrations = {
            let mut state = self.inner.state.lock();
            if state.signaled {
                return;
            }
            state.signaled = true;
            std::mem::take(&mut state.registrations)
        };
        self.inner.signal.notify_all();

        for registration in registrations {
            registration.fire(false, Dispatch::Executor);
        }
    }

    /// Returns the handle to the unsignaled state.
    pub fn reset(&self) {
        self.inner.state.lock().signaled = false;
    }

    /// Whether the handle is signaled.
    pub fn is_set(&self) -> bool {
        self.inner.state.lock().signaled
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Blocks until the handle is signaled.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while !state.signaled {
            self.inner.signal.wait(&mut state);
        }
    }

    /// Blocks until the handle is signaled or `timeout` elapses.
    /// Returns `true` if the handle was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut state = self.inner.state.lock();
        while !state.signaled {
            if self.inner.signal.wait_until(&mut state, deadline).timed_out() {
                return state.signaled;
            }
        }
        true
    }

    /// Releases the handle. New registrations are refused and pending
    /// registrations are detached; they can still fire through their timeout
    /// or an explicit [`RegisteredWait::signal`].
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.registrations.clear();
    }
}

impl std::fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WaitHandle")
            .field("signaled", &state.signaled)
            .field("closed", &state.closed)
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    /// Already running on a worker
    Inline,
    /// Submit the callback to the executor
    Executor,
}

struct Registration {
    fired: AtomicBool,
    callback: Mutex<Option<WaitCallback>>,
    timer: Mutex<Option<TimerHandle>>,
    handle: Weak<WaitInner>,
    executor: Arc<dyn Executor>,
}

impl Registration {
    /// Fires the registration once. Later calls return `false`.
    fn fire(&self, timed_out: bool, dispatch: Dispatch) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel();
        }
        if timed_out {
            self.detach();
        }

        let Some(callback) = self.callback.lock().take() else {
            return true;
        };
        match dispatch {
            Dispatch::Inline => callback(timed_out),
            Dispatch::Executor => {
                if let Err(error) = self
                    .executor
                    .execute(Box::new(move || callback(timed_out)))
                {
                    tracing::error!(%error, timed_out, "registered wait callback lost");
                }
            }
        }
        true
    }

    /// Removes this registration from its handle's pending list.
    fn detach(&self) {
        if let Some(inner) = self.handle.upgrade() {
            let mut state = inner.state.lock();
            state
                .registrations
                .retain(|r| !std::ptr::eq(Arc::as_ptr(r), self as *const Registration));
        }
    }
}

/// A wait registered with [`Runtime::register_wait`](crate::Runtime::register_wait).
pub struct RegisteredWait {
    registration: Arc<Registration>,
}

impl RegisteredWait {
    /// Fires the wait now, on the executor, unless it already fired.
    pub fn signal(&self, timed_out: bool) -> bool {
        self.registration.fire(timed_out, Dispatch::Executor)
    }

    /// Cancels the wait without running its callback. Returns `false` if it
    /// already fired.
    pub fn unregister(&self) -> bool {
        if self.registration.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(timer) = self.registration.timer.lock().take() {
            timer.cancel();
        }
        self.registration.detach();
        self.registration.callback.lock().take();
        true
    }

    /// Whether the callback has been dispatched (or the wait unregistered).
    pub fn is_fired(&self) -> bool {
        self.registration.fired.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RegisteredWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredWait")
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// Registers `callback` against `handle`. The timer is armed through
/// `schedule`, which receives the job to run when the timeout elapses.
pub(crate) fn register(
    handle: &WaitHandle,
    executor: Arc<dyn Executor>,
    callback: WaitCallback,
    schedule: impl FnOnce(Box<dyn FnOnce() + Send>) -> Option<TimerHandle>,
) -> Result<RegisteredWait, AsyncError> {
    let registration = Arc::new(Registration {
        fired: AtomicBool::new(false),
        callback: Mutex::new(Some(callback)),
        timer: Mutex::new(None),
        handle: Arc::downgrade(&handle.inner),
        executor,
    });

    {
        let mut state = handle.inner.state.lock();
        if state.closed {
            return Err(AsyncError::invalid_operation("the wait handle is closed"));
        }
        if state.signaled {
            drop(state);
            registration.fire(false, Dispatch::Executor);
            return Ok(RegisteredWait { registration });
        }
        state.registrations.push(registration.clone());
    }

    let weak = Arc::downgrade(&registration);
    let timer = schedule(Box::new(move || {
        if let Some(registration) = weak.upgrade() {
            registration.fire(true, Dispatch::Inline);
        }
    }));
    if let Some(timer) = timer {
        *registration.timer.lock() = Some(timer.clone());
        if registration.fired.load(Ordering::Acquire) {
            timer.cancel();
        }
    }

    Ok(RegisteredWait { registration })
}
