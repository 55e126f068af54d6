//! Unit tests for the combinator library

use super::test_runtime;
use async_runtime::{
    combine, execute_sequentially, join, wait_all, AsyncError, ErrorKind, Future, FutureHandle,
    Promise,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn convert_maps_result() {
    let promise = Promise::new();
    let text = promise.future().convert(|v: u32| Ok(format!("#{v}")));
    promise.set_result(7);
    assert_eq!(text.result().unwrap(), "#7");
}

#[test]
fn convert_error_becomes_dependent_error() {
    let converted = Future::ready(1).convert::<i32, _>(|_| Err(AsyncError::application("rejected")));
    assert_eq!(converted.result().unwrap_err().message(), "rejected");
}

#[test]
fn convert_propagates_cancellation() {
    let promise = Promise::<i32>::new();
    let converted = promise.future().convert(|v| Ok(v));
    promise.future().cancel();
    assert!(converted.is_canceled());
}

#[test]
fn validate_rejects() {
    let checked = Future::ready(-1).validate(|v| {
        if *v < 0 {
            Err(AsyncError::invalid_argument("negative"))
        } else {
            Ok(())
        }
    });
    assert_eq!(checked.result().unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(Future::ready(2).validate(|_| Ok(())).result().unwrap(), 2);
}

#[test]
fn catch_passes_success_through() {
    let value = Future::ready(5).catch(|_| Ok(0));
    assert_eq!(value.result().unwrap(), 5);
}

#[test]
fn catch_handler_error_becomes_result_error() {
    let failed = Future::<i32>::failed(AsyncError::application("first"));
    let handled = failed.catch(|e| Err(AsyncError::application(format!("handled {}", e.message()))));
    assert_eq!(handled.result().unwrap_err().message(), "handled first");
}

#[test]
fn forward_to_copies_outcome() {
    let destination = Promise::new();
    Future::ready("forwarded").forward_to(&destination);
    assert_eq!(destination.future().result().unwrap(), "forwarded");
}

#[test]
fn join_collects_in_order() {
    let a = Promise::new();
    let b = Promise::new();
    let joined = join(vec![a.future(), b.future()]);
    b.set_result(2);
    assert!(!joined.is_complete());
    a.set_result(1);
    assert_eq!(joined.result().unwrap(), vec![1, 2]);
}

#[test]
fn join_fails_without_waiting_for_others() {
    let slow = Promise::<i32>::new();
    let failing = Promise::<i32>::new();
    let joined = join(vec![slow.future(), failing.future()]);
    failing.set_error(AsyncError::application("second input"));
    assert!(joined.is_complete());
    assert_eq!(joined.result().unwrap_err().message(), "second input");
    assert!(!slow.is_complete());
}

#[test]
fn join_of_nothing_is_empty() {
    assert!(join(Vec::<Future<u8>>::new()).result().unwrap().is_empty());
}

#[test]
fn combine_succeeds_when_some_fail() {
    let combined = combine(vec![
        Future::<u8>::failed(AsyncError::application("one")),
        Future::ready(1),
    ]);
    assert!(combined.has_result());
}

#[test]
fn combine_fails_when_all_fail() {
    let combined = combine(vec![
        Future::<u8>::failed(AsyncError::application("one")),
        Future::<u8>::failed(AsyncError::application("two")),
    ]);
    assert_eq!(combined.result().unwrap_err().kind(), ErrorKind::Aggregate);
}

#[test]
fn combine_accepts_mixed_types() {
    let handles: Vec<FutureHandle> = vec![Future::ready(1u8).handle(), Future::ready("x").handle()];
    assert!(combine(handles).has_result());
}

#[test]
fn wait_all_blocks_until_complete() {
    let promise = Promise::new();
    let publisher = promise.clone();
    let setter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        publisher.set_result(());
    });
    wait_all(vec![promise.future(), Future::ready(())]);
    assert!(promise.is_complete());
    setter.join().unwrap();
}

#[test]
fn execute_sequentially_visits_in_order() {
    let visited = Arc::new(Mutex::new(Vec::new()));
    let v = visited.clone();
    let steps = (0..5).map(move |i| {
        v.lock().push(i);
        Future::ready(())
    });
    assert!(execute_sequentially(steps, true).has_result());
    assert_eq!(*visited.lock(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn execute_sequentially_across_threads() {
    let steps = (0..20).map(|i| {
        let promise = Promise::new();
        let publisher = promise.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(1));
            publisher.set_result(i);
        });
        promise.future()
    });
    let result = execute_sequentially(steps, true);
    assert!(result.wait_timeout(Duration::from_secs(10)));
    assert!(result.has_result());
}

#[test]
fn timeout_passes_through_fast_result() {
    let runtime = test_runtime();
    let fast = Future::ready(1).timeout_on(&runtime, Duration::from_secs(5));
    assert_eq!(fast.result().unwrap(), 1);
}

#[test]
fn timeout_cancels_slow_source() {
    let runtime = test_runtime();
    let source = Promise::<i32>::new();
    let started = Instant::now();
    let raced = source.future().timeout_on(&runtime, Duration::from_millis(30));
    let error = raced.result().unwrap_err();
    assert!(error.is_timeout());
    assert!(error.message().starts_with("Timed out after"));
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert!(source.future().is_canceled());
}

#[test]
fn timeout_or_uses_fallback() {
    let source = Promise::<&str>::new();
    let raced = source.future().timeout_or("fallback", Duration::from_millis(20));
    assert_eq!(raced.result().unwrap(), "fallback");
}
