//! Functions composing futures.
//!
//! Every combinator returns a new future and never runs user code on the
//! caller's stack unless its source is already complete. Errors returned or
//! panics raised by user-supplied functions become the dependent future's
//! error; they never propagate to the caller of the combinator.

use crate::future::{Future, FutureHandle, FutureStatus, Promise};
use crate::runtime::Runtime;
use crate::unwind::guard;
use core_types::AsyncError;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

impl<T: Clone + Send + 'static> Future<T> {
    /// Maps a successful result through `converter`.
    ///
    /// Failure and cancellation of the source propagate unchanged. Canceling
    /// the returned future also attempts to cancel the source.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_runtime::Future;
    ///
    /// let doubled = Future::ready(21).convert(|v| Ok(v * 2));
    /// assert_eq!(doubled.result().unwrap(), 42);
    /// ```
    pub fn convert<U, F>(&self, converter: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, AsyncError> + Send + 'static,
    {
        let destination = Promise::new();
        let result = destination.future();

        let source = self.clone();
        result.on_cancel(move || {
            source.cancel();
        });

        self.on_complete(move |source| match source.status() {
            FutureStatus::Success => {
                destination.complete_with(source.outcome().and_then(|v| guard(|| converter(v))));
            }
            FutureStatus::Canceled => {
                destination.future().cancel();
            }
            _ => {
                if let Some(error) = source.failure() {
                    destination.set_error(error);
                }
            }
        });
        result
    }

    /// Passes a successful result through `validator`, failing the returned
    /// future if it rejects.
    pub fn validate<F>(&self, validator: F) -> Future<T>
    where
        F: FnOnce(&T) -> Result<(), AsyncError> + Send + 'static,
    {
        self.convert(move |value| {
            validator(&value)?;
            Ok(value)
        })
    }

    /// Recovers from a failure by producing a fallback with `handler`.
    pub fn catch<F>(&self, handler: F) -> Future<T>
    where
        F: FnOnce(AsyncError) -> Result<T, AsyncError> + Send + 'static,
    {
        let destination = Promise::new();
        let result = destination.future();
        self.on_complete(move |source| match source.status() {
            FutureStatus::Failure => {
                let outcome = match source.failure() {
                    Some(error) => guard(|| handler(error)),
                    None => Err(AsyncError::application("unknown error")),
                };
                destination.complete_with(outcome);
            }
            _ => source.forward_to(&destination),
        });
        result
    }

    /// Copies this future's outcome into `destination` once it completes.
    pub fn forward_to(&self, destination: &Promise<T>) {
        let destination = destination.clone();
        self.on_complete(move |source| match source.status() {
            FutureStatus::Canceled => {
                destination.future().cancel();
            }
            _ => {
                destination.complete_with(source.outcome());
            }
        });
    }

    /// Races this future against a timer on the global runtime.
    ///
    /// See [`timeout_on`](Self::timeout_on).
    pub fn timeout_with(&self, timeout: Duration) -> Future<T> {
        self.timeout_on(Runtime::global(), timeout)
    }

    /// Races this future against a timer.
    ///
    /// If the timer fires first the source is canceled and the returned
    /// future fails with a `Timeout` error; a later completion of the source
    /// has no visible effect. If the source completes first the timer is
    /// disarmed and the outcome is forwarded.
    pub fn timeout_on(&self, runtime: &Runtime, timeout: Duration) -> Future<T> {
        self.race_timer(runtime, timeout, |started| {
            Err(AsyncError::timeout(format!(
                "Timed out after {:.2} seconds",
                started.elapsed().as_secs_f64()
            )))
        })
    }

    /// Like [`timeout_with`](Self::timeout_with), but completes with
    /// `fallback` when the timer wins.
    pub fn timeout_or(&self, fallback: T, timeout: Duration) -> Future<T> {
        self.race_timer(Runtime::global(), timeout, move |_| Ok(fallback))
    }

    fn race_timer<F>(&self, runtime: &Runtime, timeout: Duration, on_timeout: F) -> Future<T>
    where
        F: FnOnce(Instant) -> Result<T, AsyncError> + Send + 'static,
    {
        const PENDING: u8 = 0;
        const SOURCE: u8 = 1;
        const TIMER: u8 = 2;

        let destination = Promise::new();
        let result = destination.future();
        let winner = Arc::new(AtomicU8::new(PENDING));
        let started = Instant::now();

        let source = self.clone();
        let timer_winner = winner.clone();
        let timer_destination = destination.clone();
        let timer = runtime.schedule(
            timeout,
            Box::new(move || {
                if timer_winner
                    .compare_exchange(PENDING, TIMER, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::debug!(?timeout, "timer won the race");
                    source.cancel();
                    timer_destination.complete_with(on_timeout(started));
                }
            }),
        );

        self.on_complete(move |source| {
            if winner
                .compare_exchange(PENDING, SOURCE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                timer.cancel();
                source.forward_to(&destination);
            }
        });
        result
    }
}

/// Waits for every future and collects their results in order.
///
/// Fails as soon as any input fails, with that input's error. A canceled
/// input is reported as an error.
///
/// # Examples
///
/// ```
/// use async_runtime::{join, Future};
///
/// let all = join(vec![Future::ready(1), Future::ready(2)]);
/// assert_eq!(all.result().unwrap(), vec![1, 2]);
/// ```
pub fn join<T, I>(futures: I) -> Future<Vec<T>>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let sources: Arc<Vec<Future<T>>> = Arc::new(futures.into_iter().collect());
    if sources.is_empty() {
        return Future::ready(Vec::new());
    }

    let destination = Promise::new();
    let result = destination.future();
    let remaining = Arc::new(AtomicUsize::new(sources.len()));

    for source in sources.iter() {
        let destination = destination.clone();
        let remaining = remaining.clone();
        let sources = sources.clone();
        source.on_complete(move |source| match source.status() {
            FutureStatus::Failure => {
                if let Some(error) = source.failure() {
                    destination.set_error(error);
                }
            }
            FutureStatus::Canceled => {
                destination.set_error(AsyncError::canceled(
                    "One or more underlying futures was canceled.",
                ));
            }
            _ => {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    destination
                        .complete_with(sources.iter().map(|f| f.outcome()).collect());
                }
            }
        });
    }
    result
}

/// Waits for every future, logging individual failures.
///
/// The returned future fails only if every input failed; otherwise it
/// succeeds. Canceled inputs do not count as failures.
pub fn combine<I>(futures: I) -> Future<()>
where
    I: IntoIterator,
    I::Item: Into<FutureHandle>,
{
    let sources: Vec<FutureHandle> = futures.into_iter().map(Into::into).collect();
    if sources.is_empty() {
        return Future::ready(());
    }

    let destination = Promise::new();
    let result = destination.future();
    let total = sources.len();
    let remaining = Arc::new(AtomicUsize::new(total));
    let failures = Arc::new(AtomicUsize::new(0));

    for source in sources {
        let destination = destination.clone();
        let remaining = remaining.clone();
        let failures = failures.clone();
        let observed = source.clone();
        source.on_complete(move || {
            if let Some(error) = observed.failure() {
                tracing::error!(%error, call_site = %error.call_site(), "combined future failed");
                failures.fetch_add(1, Ordering::AcqRel);
            }
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                if failures.load(Ordering::Acquire) == total {
                    destination.set_error(AsyncError::aggregate(
                        "All combined futures failed. See the log for details.",
                    ));
                } else {
                    destination.set_result(());
                }
            }
        });
    }
    result
}

/// Blocks until every future has completed.
pub fn wait_all<I>(futures: I)
where
    I: IntoIterator,
    I::Item: Into<FutureHandle>,
{
    for future in futures {
        future.into().wait();
    }
}
