//! Capturing panics raised by user code.

use core_types::AsyncError;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

/// Runs `f`, turning a panic into an [`AsyncError`] of kind `Panicked`.
pub(crate) fn guard<R>(f: impl FnOnce() -> Result<R, AsyncError>) -> Result<R, AsyncError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(AsyncError::from_panic(payload)),
    }
}

/// Runs every callback in order with try/finally semantics: a panicking
/// callback does not prevent the ones after it from running, and the first
/// panic is resumed once all of them have run.
pub(crate) fn run_all<C>(callbacks: Vec<C>, mut invoke: impl FnMut(C)) {
    let mut first_panic = None;
    for callback in callbacks {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| invoke(callback))) {
            if first_panic.is_none() {
                first_panic = Some(payload);
            }
        }
    }
    if let Some(payload) = first_panic {
        resume_unwind(payload);
    }
}
