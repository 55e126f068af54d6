//! The runtime handle: configuration, worker pool and timer.

use crate::config::RuntimeConfig;
use crate::pool::{Executor, Job, WorkerPool};
use crate::timer::{Timer, TimerHandle};
use crate::wait::{self, RegisteredWait, WaitCallback, WaitHandle};
use core_types::AsyncError;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

struct RuntimeInner {
    config: RuntimeConfig,
    pool: Arc<WorkerPool>,
    timer: Timer,
}

/// Shared handle to the services operations and combinators run on.
///
/// Cloning is cheap; all clones refer to the same pool and timer.
///
/// # Examples
///
/// ```
/// use async_runtime::{Runtime, RuntimeConfig};
/// use std::time::Duration;
/// use crossbeam::channel;
///
/// let runtime = Runtime::new(RuntimeConfig::default().with_worker_threads(2)).unwrap();
/// let (tx, rx) = channel::bounded(1);
/// runtime.schedule(Duration::from_millis(5), Box::new(move || tx.send("tick").unwrap()));
/// assert_eq!(rx.recv().unwrap(), "tick");
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
    /// Starts a runtime from a validated configuration.
    pub fn new(config: RuntimeConfig) -> Result<Self, AsyncError> {
        config.validate()?;
        let pool = Arc::new(WorkerPool::new(
            config.worker_threads,
            &config.thread_name_prefix,
        )?);
        let executor: Arc<dyn Executor> = pool.clone();
        let timer = Timer::new(executor, &format!("{}-timer", config.thread_name_prefix))?;

        tracing::info!(
            workers = config.worker_threads,
            max_synchronous_depth = config.max_synchronous_depth,
            "runtime started"
        );
        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                config,
                pool,
                timer,
            }),
        })
    }

    /// The process-wide runtime, started with the default configuration on
    /// first use.
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(|| {
            Runtime::new(RuntimeConfig::default())
                .unwrap_or_else(|e| panic!("failed to start the global runtime: {e}"))
        })
    }

    /// The configuration this runtime was started with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// The worker pool as an executor.
    pub fn executor(&self) -> Arc<dyn Executor> {
        self.inner.pool.clone()
    }

    /// Runs `job` on a worker.
    pub fn spawn(&self, job: Job) -> Result<(), AsyncError> {
        self.inner.pool.execute(job)
    }

    /// Runs `job` on a worker once `delay` has elapsed.
    pub fn schedule(&self, delay: Duration, job: Job) -> TimerHandle {
        self.inner.timer.schedule(delay, job)
    }

    /// Runs `callback` on a worker exactly once: when `handle` is set, or
    /// with `timed_out == true` when `timeout` elapses first.
    pub fn register_wait(
        &self,
        handle: &WaitHandle,
        timeout: Duration,
        callback: WaitCallback,
    ) -> Result<RegisteredWait, AsyncError> {
        wait::register(handle, self.executor(), callback, |job| {
            Some(self.schedule(timeout, job))
        })
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .finish()
    }
}
