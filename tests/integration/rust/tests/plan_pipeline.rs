//! Plan Pipeline Integration Tests
//!
//! Tests the flow across component boundaries: timers complete promises,
//! execution plans wait on the resulting futures, and plan results come
//! back out through futures again.

use async_runtime::{
    combine, execute_sequentially, join, AsyncError, ErrorKind, Future, Operation, Plan, PlanStep,
    Promise, Runtime, RuntimeConfig,
};
use parking_lot::Mutex;
use std::iter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default().with_worker_threads(4)).expect("Runtime failed to start")
}

/// Helper: a future completed by the runtime's timer after `delay_ms`
fn delayed_value(runtime: &Runtime, value: i32, delay_ms: u64) -> Future<i32> {
    let promise = Promise::new();
    let future = promise.future();
    runtime.schedule(
        Duration::from_millis(delay_ms),
        Box::new(move || {
            promise.set_result(value);
        }),
    );
    future
}

/// Test: a plan waits on timer-driven futures and publishes their sum
#[test]
fn test_plan_sums_delayed_values() {
    let runtime = runtime();
    let sum = Future::from_operation_pattern_on(&runtime, |op: &Operation, publish: Promise<i32>| {
        let values: Vec<Future<i32>> = [(1, 30), (2, 10), (3, 20)]
            .into_iter()
            .map(|(value, delay)| delayed_value(op.runtime(), value, delay))
            .collect();
        let waits: Vec<PlanStep> = values
            .iter()
            .map(|value| Ok(op.create_from_future(value, TIMEOUT)))
            .collect();

        waits.into_iter().chain(
            iter::once_with(move || -> Option<PlanStep> {
                publish.complete_with(values.iter().map(Future::result).sum());
                None
            })
            .flatten(),
        )
    });

    assert_eq!(sum.result().unwrap(), 6);
}

/// Test: a plan whose step never completes surfaces as a timeout error
#[test]
fn test_plan_timeout_reaches_future() {
    let runtime = runtime();
    let never = Future::<i32>::from_operation_pattern_on(&runtime, |op: &Operation, _publish| {
        iter::once(PlanStep::Ok(op.create(Duration::from_millis(50))))
    });

    let error = never.result().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Timeout);
    assert!(error.message().ends_with("timed-out."));
}

/// Test: plan results can be joined like any other futures
#[test]
fn test_join_plan_results() {
    let runtime = runtime();
    let plans: Vec<Future<i32>> = (1..=4)
        .map(|n| {
            Future::from_operation_pattern_on(&runtime, move |op: &Operation, publish: Promise<i32>| {
                let value = delayed_value(op.runtime(), n * 10, 5);
                let wait = op.create_from_future(&value, TIMEOUT);
                iter::once(PlanStep::Ok(wait)).chain(
                    iter::once_with(move || -> Option<PlanStep> {
                        publish.complete_with(value.result());
                        None
                    })
                    .flatten(),
                )
            })
        })
        .collect();

    assert_eq!(join(plans).result().unwrap(), vec![10, 20, 30, 40]);
}

/// Test: execute_sequentially creates each future only after the previous completed
#[test]
fn test_sequential_futures_are_created_lazily() {
    let runtime = runtime();
    let started = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));

    let steps = {
        let runtime = runtime.clone();
        let started = started.clone();
        let log = log.clone();
        (0..5).map(move |n| {
            assert_eq!(started.fetch_add(1, Ordering::SeqCst), n);
            let log = log.clone();
            let value = delayed_value(&runtime, n as i32, 5);
            value.on_success(move |v| log.lock().push(v));
            value
        })
    };

    execute_sequentially(steps, true).result().unwrap();
    assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
}

/// Test: a failing future stops the sequence and its error is re-raised
#[test]
fn test_sequential_stops_on_error() {
    let runtime = runtime();
    let created = Arc::new(AtomicUsize::new(0));

    let steps = {
        let runtime = runtime.clone();
        let created = created.clone();
        (0..5).map(move |n| {
            created.fetch_add(1, Ordering::SeqCst);
            if n == 2 {
                Future::failed(AsyncError::application("third step failed"))
            } else {
                delayed_value(&runtime, n, 5)
            }
        })
    };

    let error = execute_sequentially(steps, true).result().unwrap_err();
    assert_eq!(error.message(), "third step failed");
    assert_eq!(created.load(Ordering::SeqCst), 3);
}

/// Test: combine succeeds while at least one plan succeeds
#[test]
fn test_combine_tolerates_partial_failure() {
    let runtime = runtime();
    let good = delayed_value(&runtime, 1, 5);
    let bad = Future::<i32>::failed(AsyncError::application("bad input"));

    assert!(combine([good, bad]).result().is_ok());
}

/// Test: a parallel fan-out fails fast on the first failing child
#[test]
fn test_parallel_child_failure_reaches_done() {
    let runtime = runtime();
    let (tx, rx) = std::sync::mpsc::channel();
    let slow_steps = Arc::new(AtomicUsize::new(0));

    let counted = slow_steps.clone();
    runtime.start(
        move |op: &Operation| {
            let failing = Plan::new(|_: &Operation| {
                iter::once(PlanStep::Err(AsyncError::application("child failed")))
            });
            let slow = Plan::new(move |child: &Operation| {
                let child = child.clone();
                (0..50).map(move |_| -> PlanStep {
                    let counted = counted.clone();
                    let runtime = child.runtime().clone();
                    Ok(child.create_from_callback(
                        move |completer| {
                            runtime.schedule(
                                Duration::from_millis(20),
                                Box::new(move || {
                                    counted.fetch_add(1, Ordering::SeqCst);
                                    completer.complete();
                                }),
                            );
                        },
                        TIMEOUT,
                    ))
                })
            });
            let parallel = op.create_parallel(TIMEOUT, vec![failing, slow]);
            let joined = parallel.clone();
            iter::once(parallel).chain(
                iter::once_with(move || joined.and_then(|p| p.end()))
                    .filter_map(|ended| ended.err().map(Err)),
            )
        },
        move |run: &Operation| tx.send(run.end()).unwrap(),
    );

    let error = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();
    assert_eq!(error.message(), "child failed");
    assert!(slow_steps.load(Ordering::SeqCst) < 50);
}

/// Test: deferred tasks queued from a plan step run on the runtime's workers
#[test]
fn test_deferred_task_completes_plan_step() {
    let runtime = runtime();
    let scheduler = Arc::new(runtime.deferred_scheduler().unwrap());
    let (tx, rx) = std::sync::mpsc::channel();

    let deferred = scheduler.clone();
    runtime.start(
        move |op: &Operation| {
            let step = op.create_from_callback(
                move |completer| {
                    deferred.queue_task(move || completer.complete(), Duration::from_millis(20));
                },
                TIMEOUT,
            );
            iter::once(PlanStep::Ok(step))
        },
        move |run: &Operation| tx.send((run.timed_out(), run.end().is_ok())).unwrap(),
    );

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), (false, true));
    assert!(scheduler.is_empty());
    scheduler.shutdown();
}

/// Test: timeout_on fails a future nobody completes
#[test]
fn test_timeout_on_abandoned_promise() {
    let runtime = runtime();
    let abandoned = Promise::<i32>::new();

    let error = abandoned
        .future()
        .timeout_on(&runtime, Duration::from_millis(20))
        .result()
        .unwrap_err();
    assert!(error.is_timeout());
    assert!(error.message().starts_with("Timed out after"));
}
