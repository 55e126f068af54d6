//! Unit test suites for async_runtime

mod combinator_test;
mod parallel_test;

use async_runtime::{Runtime, RuntimeConfig};

/// A small isolated runtime so suites do not share workers.
pub(crate) fn test_runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default().with_worker_threads(4)).unwrap()
}
