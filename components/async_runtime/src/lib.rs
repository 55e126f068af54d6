//! Single-assignment futures and a continuation-driven operation scheduler.
//!
//! This crate provides the asynchronous execution engine:
//! - Futures and promises with blocking waits and completion callbacks
//! - Combinators composing futures (convert, join, combine, timeouts, ...)
//! - An operation scheduler that drives execution plans step by step
//! - A deferred task scheduler for timer-driven one-shot callbacks
//!
//! # Overview
//!
//! - [`Promise`] / [`Future`] - write and read sides of a single-assignment cell
//! - [`Operation`] - a node of a running execution plan
//! - [`Runtime`] - worker pool, timer and configuration everything runs on
//! - [`DeferredTaskScheduler`] - callbacks queued for a due time
//!
//! # Examples
//!
//! ## Promise Usage
//!
//! ```
//! use async_runtime::Promise;
//!
//! let promise = Promise::new();
//! let doubled = promise.future().convert(|v: i32| Ok(v * 2));
//! promise.set_result(21);
//! assert_eq!(doubled.result().unwrap(), 42);
//! ```
//!
//! ## Execution Plan Usage
//!
//! ```
//! use async_runtime::{Operation, PlanStep, Runtime, RuntimeConfig};
//! use crossbeam::channel;
//! use std::time::Duration;
//!
//! let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
//! let (tx, rx) = channel::bounded(1);
//! runtime.start(
//!     |op: &Operation| {
//!         let op = op.clone();
//!         (0..3).map(move |_| -> PlanStep {
//!             Ok(op.create_from_callback(|done| done.complete(), Duration::from_secs(1)))
//!         })
//!     },
//!     move |run: &Operation| tx.send(run.end()).unwrap(),
//! );
//! assert!(rx.recv().unwrap().is_ok());
//! ```
//!
//! ## Deferred Task Usage
//!
//! ```
//! use async_runtime::{DeferredTaskScheduler, InlineExecutor};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let scheduler = DeferredTaskScheduler::manual(Arc::new(InlineExecutor));
//! scheduler.queue_task(|| println!("due"), Duration::ZERO);
//! assert_eq!(scheduler.poll(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod async_result;
pub mod combinators;
pub mod config;
pub mod deferred;
pub mod future;
pub mod operation;
pub mod parallel;
pub mod patterns;
pub mod plan;
pub mod pool;
pub mod runtime;
pub mod scheduler;
pub mod sequential;
pub mod timer;
pub mod wait;

mod unwind;

// Re-export main types at crate root
pub use async_result::{AsyncCallback, AsyncHandle, AsyncResult};
pub use combinators::{combine, join, wait_all};
pub use config::RuntimeConfig;
pub use core_types::{AsyncError, ErrorKind};
pub use deferred::{DeferredTaskScheduler, TaskHandle};
pub use future::{Future, FutureHandle, FutureStatus, Promise};
pub use operation::{Completer, Operation};
pub use plan::{ContextHooks, ExecutionPlan, Hook, Plan, PlanStep, PlanSteps};
pub use pool::{Executor, InlineExecutor, Job, WorkerPool};
pub use runtime::Runtime;
pub use sequential::execute_sequentially;
pub use timer::{Timer, TimerHandle};
pub use wait::{RegisteredWait, WaitCallback, WaitHandle};
