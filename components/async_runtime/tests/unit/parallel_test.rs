//! Unit tests for parallel fan-out

use super::test_runtime;
use async_runtime::{AsyncError, ErrorKind, Operation, Plan, PlanStep};
use crossbeam::channel;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

/// A plan of `steps` callback operations that each complete after `delay`.
fn delayed_plan(steps: usize, delay: Duration, counter: Arc<AtomicUsize>) -> Plan {
    Plan::new(move |op: &Operation| {
        let op = op.clone();
        (0..steps).map(move |_| -> PlanStep {
            counter.fetch_add(1, Ordering::SeqCst);
            let runtime = op.runtime().clone();
            Ok(op.create_from_callback(
                move |done| {
                    runtime.schedule(delay, Box::new(move || done.complete()));
                },
                Duration::from_secs(5),
            ))
        })
    })
}

/// Runs a single parallel step and reports the run's outcome.
fn run_parallel(
    timeout: Duration,
    plans: Vec<Plan>,
) -> (bool, Option<AsyncError>) {
    let (tx, rx) = channel::bounded(1);
    test_runtime().start(
        move |op: &Operation| {
            let parallel = op.create_parallel(timeout, plans);
            let joined = parallel.clone();
            std::iter::once(parallel).chain(
                std::iter::once_with(move || joined.and_then(|p| p.end()))
                    .filter_map(|ended| ended.err().map(Err)),
            )
        },
        move |run: &Operation| tx.send((run.timed_out(), run.asynchronous_exception())).unwrap(),
    );
    rx.recv_timeout(WAIT).unwrap()
}

#[test]
fn all_children_finish() {
    let a = Arc::new(AtomicUsize::new(0));
    let b = Arc::new(AtomicUsize::new(0));
    let (timed_out, error) = run_parallel(
        Duration::from_secs(5),
        vec![
            delayed_plan(3, Duration::from_millis(5), a.clone()),
            delayed_plan(2, Duration::from_millis(5), b.clone()),
        ],
    );
    assert!(!timed_out);
    assert!(error.is_none());
    assert_eq!(a.load(Ordering::SeqCst), 3);
    assert_eq!(b.load(Ordering::SeqCst), 2);
}

#[test]
fn child_error_fails_the_join() {
    let counter = Arc::new(AtomicUsize::new(0));
    let failing = Plan::new(|_: &Operation| vec![PlanStep::Err(AsyncError::application("child failed"))]);
    let (timed_out, error) = run_parallel(
        Duration::from_secs(5),
        vec![delayed_plan(50, Duration::from_millis(10), counter), failing],
    );
    assert!(!timed_out);
    assert_eq!(error.unwrap().message(), "child failed");
}

#[test]
fn child_timeout_times_out_the_join() {
    let stuck = Plan::new(|op: &Operation| vec![PlanStep::Ok(op.create(Duration::from_millis(20)))]);
    let counter = Arc::new(AtomicUsize::new(0));
    let (timed_out, error) = run_parallel(
        Duration::from_secs(5),
        vec![stuck, delayed_plan(1, Duration::from_millis(1), counter)],
    );
    assert!(timed_out);
    assert!(error.is_none());
}

#[test]
fn overall_ceiling_times_out_the_join() {
    let slow = Plan::new(|op: &Operation| vec![PlanStep::Ok(op.create(Duration::from_secs(30)))]);
    let (timed_out, _) = run_parallel(Duration::from_millis(30), vec![slow]);
    assert!(timed_out);
}

#[test]
fn empty_plan_list_is_rejected() {
    let (tx, rx) = channel::bounded(1);
    test_runtime().start(
        move |op: &Operation| {
            let result = op.create_parallel(Duration::from_secs(1), Vec::new());
            tx.send(result.map(|_| ())).unwrap();
            Vec::<PlanStep>::new()
        },
        |_: &Operation| {},
    );
    let err = rx.recv_timeout(WAIT).unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[test]
fn failing_child_drops_sibling_steps_promptly() {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = DropFlag(dropped.clone());
    let waiting = Plan::new(move |op: &Operation| {
        let op = op.clone();
        (0..1).map(move |_| -> PlanStep {
            let _held = &flag;
            Ok(op.create(Duration::from_secs(3)))
        })
    });
    let failing = Plan::new(|_: &Operation| vec![PlanStep::Err(AsyncError::application("child failed"))]);

    let started = Instant::now();
    let (timed_out, error) = run_parallel(Duration::from_secs(5), vec![waiting, failing]);
    assert!(!timed_out);
    assert_eq!(error.unwrap().message(), "child failed");

    while !dropped.load(Ordering::SeqCst) && started.elapsed() < Duration::from_secs(1) {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(dropped.load(Ordering::SeqCst));
}
