//! Driving a sequence of futures one at a time.

use crate::future::{Future, FutureHandle, Promise};
use crate::unwind::guard;
use core_types::AsyncError;
use parking_lot::Mutex;
use std::sync::Arc;

struct SequenceState<It> {
    /// `None` once the sequence has finished
    iter: Option<It>,
    /// A frame is currently pulling items
    stepping: bool,
    /// A completion arrived while a frame was stepping
    pending: bool,
}

struct Sequence<It> {
    state: Mutex<SequenceState<It>>,
    destination: Promise<()>,
    stop_on_error: bool,
}

/// Awaits each future produced by `futures` before pulling the next one.
///
/// The returned future succeeds once the sequence is exhausted. With
/// `stop_on_error`, the first failed item ends the sequence and becomes the
/// result's error; otherwise failed items are skipped. Errors raised while
/// pulling from or dropping the iterator always end the sequence, and an
/// error from dropping it takes priority.
///
/// Already-completed items never recurse: the stepping frame loops over
/// them, and completions that arrive while a frame is stepping only flag
/// that frame to continue. Long chains of completed futures therefore run in
/// constant stack space.
///
/// # Examples
///
/// ```
/// use async_runtime::{execute_sequentially, Future};
///
/// let steps = (0..10_000).map(|_| Future::ready(()));
/// assert!(execute_sequentially(steps, true).has_result());
/// ```
pub fn execute_sequentially<I>(futures: I, stop_on_error: bool) -> Future<()>
where
    I: IntoIterator,
    I::Item: Into<FutureHandle>,
    I::IntoIter: Send + 'static,
{
    let sequence = Arc::new(Sequence {
        state: Mutex::new(SequenceState {
            iter: Some(futures.into_iter()),
            stepping: false,
            pending: false,
        }),
        destination: Promise::new(),
        stop_on_error,
    });
    let result = sequence.destination.future();
    sequence.advance();
    result
}

impl<It> Sequence<It>
where
    It: Iterator + Send + 'static,
    It::Item: Into<FutureHandle>,
{
    fn advance(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.stepping {
                state.pending = true;
                return;
            }
            state.stepping = true;
        }

        loop {
            let taken = self.state.lock().iter.take();
            let Some(mut iter) = taken else {
                self.state.lock().stepping = false;
                return;
            };

            let item: FutureHandle = match guard(|| Ok(iter.next())) {
                Ok(Some(item)) => item.into(),
                Ok(None) => {
                    self.finish(iter, None);
                    return;
                }
                Err(error) => {
                    self.finish(iter, Some(error));
                    return;
                }
            };

            if item.is_complete() {
                match self.failure_to_stop_on(&item) {
                    Some(error) => {
                        self.finish(iter, Some(error));
                        return;
                    }
                    None => {
                        self.state.lock().iter = Some(iter);
                        continue;
                    }
                }
            }

            self.state.lock().iter = Some(iter);
            let sequence = self.clone();
            let observed = item.clone();
            item.on_complete(move || sequence.item_completed(&observed));

            let mut state = self.state.lock();
            if state.pending {
                state.pending = false;
                continue;
            }
            state.stepping = false;
            return;
        }
    }

    fn item_completed(self: &Arc<Self>, item: &FutureHandle) {
        if let Some(error) = self.failure_to_stop_on(item) {
            let iter = self.state.lock().iter.take();
            if let Some(iter) = iter {
                self.finish(iter, Some(error));
            }
            return;
        }
        self.advance();
    }

    fn failure_to_stop_on(&self, item: &FutureHandle) -> Option<AsyncError> {
        let error = item.failure()?;
        if self.stop_on_error {
            Some(error)
        } else {
            tracing::debug!(%error, "skipping failed item in sequence");
            None
        }
    }

    fn finish(&self, iter: It, error: Option<AsyncError>) {
        self.state.lock().stepping = false;
        if let Err(drop_error) = guard(|| {
            drop(iter);
            Ok(())
        }) {
            self.destination.set_error(drop_error);
            return;
        }
        match error {
            Some(error) => self.destination.set_error(error),
            None => self.destination.set_result(()),
        };
    }
}
