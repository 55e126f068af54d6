//! Contract tests for async_runtime component
//!
//! These tests verify the behavioral guarantees the runtime makes to its
//! callers: exactly-once completion, callback timing, join semantics,
//! bounded stack use, timeout racing, fail-fast fan-out and deferred task
//! ordering.

use async_runtime::{
    combine, execute_sequentially, join, AsyncError, DeferredTaskScheduler, Future,
    InlineExecutor, Operation, Plan, PlanStep, Promise, Runtime, RuntimeConfig,
};
use crossbeam::channel;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default().with_worker_threads(4)).unwrap()
}

mod promise_contract {
    use super::*;

    #[test]
    fn exactly_one_completion_wins() {
        let promise = Promise::new();
        assert!(promise.future().cancel());
        assert!(!promise.set_result(1));
        assert!(!promise.set_error(AsyncError::application("late")));
        assert!(!promise.future().cancel());
        assert!(promise.future().is_canceled());
    }

    #[test]
    fn on_complete_before_completion_fires_once_after() {
        let promise = Promise::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        promise.future().on_complete(move |f| {
            assert!(f.is_complete());
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        promise.set_result(());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_complete_after_completion_fires_immediately() {
        let future = Future::ready(());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        future.on_complete(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        // no waiting: the callback ran inline
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

mod combinator_contract {
    use super::*;

    #[test]
    fn join_fails_on_first_failure() {
        let pending: Vec<Promise<i32>> = (0..3).map(|_| Promise::new()).collect();
        let joined = join(pending.iter().map(|p| p.future()));
        pending[1].set_error(AsyncError::application("f1 failed"));
        assert!(joined.is_complete());
        assert_eq!(joined.result().unwrap_err().message(), "f1 failed");
    }

    #[test]
    fn combine_fails_only_if_all_fail() {
        let some = combine(vec![
            Future::<()>::failed(AsyncError::application("a")),
            Future::ready(()),
            Future::<()>::failed(AsyncError::application("c")),
        ]);
        assert!(some.has_result());

        let all = combine(vec![
            Future::<()>::failed(AsyncError::application("a")),
            Future::<()>::failed(AsyncError::application("b")),
        ]);
        assert!(all.has_error());
    }

    #[test]
    fn sequential_over_ten_thousand_completed_futures() {
        let steps = (0..10_000).map(|_| Future::ready(()));
        let result = execute_sequentially(steps, true);
        assert!(result.has_result());
    }

    #[test]
    fn sequential_over_ten_thousand_late_completions() {
        // each item completes only after it is subscribed, from the
        // completion of the previous one
        let promises: Vec<Promise<()>> = (0..10_000).map(|_| Promise::new()).collect();
        let futures: Vec<Future<()>> = promises.iter().map(|p| p.future()).collect();
        let result = execute_sequentially(futures, true);
        for promise in &promises {
            promise.set_result(());
        }
        assert!(result.has_result());
    }

    #[test]
    fn timeout_with_fires_before_slow_source() {
        let runtime = runtime();
        let source = Promise::<&str>::new();
        let publisher = source.clone();
        let late = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            publisher.set_result("too late")
        });

        let started = Instant::now();
        let raced = source.future().timeout_on(&runtime, Duration::from_millis(50));
        let error = raced.result().unwrap_err();
        let elapsed = started.elapsed();
        assert!(error.is_timeout());
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(200));

        // the source was canceled, so the late completion loses
        assert!(!late.join().unwrap());
        assert!(raced.result().unwrap_err().is_timeout());
    }
}

mod scheduler_contract {
    use super::*;

    #[test]
    fn never_completing_child_times_out_the_run() {
        let (tx, rx) = channel::bounded(1);
        let started = Instant::now();
        runtime().start(
            |op: &Operation| vec![PlanStep::Ok(op.create(Duration::from_millis(100)))],
            move |run: &Operation| {
                tx.send((run.timed_out(), run.asynchronous_exception(), started.elapsed()))
                    .unwrap()
            },
        );
        let (timed_out, error, elapsed) = rx.recv_timeout(WAIT).unwrap();
        assert!(timed_out);
        assert!(error.is_none());
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn error_on_second_step_stops_the_plan() {
        let counter = Arc::new(AtomicUsize::new(0));
        let steps = counter.clone();
        let (tx, rx) = channel::bounded(1);
        runtime().start(
            move |op: &Operation| {
                let op = op.clone();
                (0..5).map(move |i| -> PlanStep {
                    if i == 1 {
                        return Err(AsyncError::application("second step failed"));
                    }
                    steps.fetch_add(1, Ordering::SeqCst);
                    let runtime = op.runtime().clone();
                    Ok(op.create_from_callback(
                        move |done| {
                            runtime.schedule(Duration::from_millis(5), Box::new(move || done.complete()));
                        },
                        Duration::from_secs(5),
                    ))
                })
            },
            move |run: &Operation| tx.send((run.timed_out(), run.asynchronous_exception())).unwrap(),
        );
        let (timed_out, error) = rx.recv_timeout(WAIT).unwrap();
        assert!(!timed_out);
        assert_eq!(error.unwrap().message(), "second step failed");

        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parallel_failure_is_fail_fast() {
        let progress = Arc::new(AtomicUsize::new(0));
        let plan_a = {
            let progress = progress.clone();
            Plan::new(move |op: &Operation| {
                let op = op.clone();
                (0..1_000).map(move |_| -> PlanStep {
                    progress.fetch_add(1, Ordering::SeqCst);
                    let runtime = op.runtime().clone();
                    Ok(op.create_from_callback(
                        move |done| {
                            runtime.schedule(Duration::from_millis(5), Box::new(move || done.complete()));
                        },
                        Duration::from_secs(5),
                    ))
                })
            })
        };
        let plan_b = Plan::new(|_: &Operation| vec![PlanStep::Err(AsyncError::application("plan b failed"))]);

        let (tx, rx) = channel::bounded(1);
        runtime().start(
            move |op: &Operation| {
                let parallel = op.create_parallel(Duration::from_secs(30), vec![plan_a, plan_b]);
                let joined = parallel.clone();
                std::iter::once(parallel).chain(
                    std::iter::once_with(move || joined.and_then(|p| p.end()))
                        .filter_map(|ended| ended.err().map(Err)),
                )
            },
            move |run: &Operation| tx.send(run.asynchronous_exception()).unwrap(),
        );

        let error = rx.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(error.message(), "plan b failed");

        // plan a may finish the step it was awaiting, then stops
        thread::sleep(Duration::from_millis(30));
        let settled = progress.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(progress.load(Ordering::SeqCst), settled);
        assert!(settled < 1_000);
    }
}

mod deferred_contract {
    use super::*;

    #[test]
    fn same_instant_tasks_run_in_queue_order() {
        let scheduler = DeferredTaskScheduler::manual(Arc::new(InlineExecutor));
        let order = Arc::new(Mutex::new(Vec::new()));
        let due = Instant::now();
        for name in ["s1", "s2"] {
            let order = order.clone();
            scheduler.queue_task_at(move || order.lock().push(name), due);
        }
        assert_eq!(scheduler.poll_at(due), 2);
        assert_eq!(*order.lock(), vec!["s1", "s2"]);
    }

    #[test]
    fn task_queued_during_pass_is_merged_after_it() {
        let scheduler = Arc::new(DeferredTaskScheduler::manual(Arc::new(InlineExecutor)));
        let third_ran = Arc::new(AtomicUsize::new(0));
        let due = Instant::now();

        let inner = scheduler.clone();
        let flag = third_ran.clone();
        scheduler.queue_task_at(
            move || {
                let flag = flag.clone();
                inner.queue_task_at(
                    move || {
                        flag.fetch_add(1, Ordering::SeqCst);
                    },
                    due,
                );
            },
            due,
        );

        assert_eq!(scheduler.poll_at(due), 1);
        assert_eq!(third_ran.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.len(), 1);

        assert_eq!(scheduler.poll_at(due), 1);
        assert_eq!(third_ran.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_empty());
    }
}
