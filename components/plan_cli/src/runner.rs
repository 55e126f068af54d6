//! Scenario runner
//!
//! Each scenario starts an execution plan (or queues deferred tasks) on the
//! runner's runtime, blocks until the run finishes and summarizes it as a
//! [`Report`].

use crate::cli::{Cli, Scenario};
use crate::error::{CliError, CliResult};
use async_runtime::{ExecutionPlan, Operation, Plan, PlanStep, Promise, Runtime, RuntimeConfig};
use parking_lot::Mutex;
use std::fmt;
use std::iter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const STEP_DELAY: Duration = Duration::from_millis(5);
const STEP_TIMEOUT: Duration = Duration::from_secs(5);
const SHORT_TIMEOUT: Duration = Duration::from_millis(50);
const TRAMPOLINE_STEPS: usize = 10_000;
const DEFERRED_DELAYS_MS: [u64; 3] = [30, 10, 20];

/// How a scenario ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The run finished without error
    Completed,
    /// The run or one of its steps timed out
    TimedOut,
    /// The run finished with the given error message
    Failed(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => f.write_str("completed"),
            Outcome::TimedOut => f.write_str("timed out"),
            Outcome::Failed(message) => write!(f, "failed ({message})"),
        }
    }
}

/// Summary of one scenario run, printed as a single line.
#[derive(Debug, Clone)]
pub struct Report {
    /// The scenario that ran
    pub scenario: Scenario,
    /// How it ended
    pub outcome: Outcome,
    /// Number of steps (or deferred tasks) that did their work
    pub steps: usize,
    /// Wall-clock time of the run
    pub elapsed: Duration,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({} steps in {:.1} ms)",
            self.scenario.name(),
            self.outcome,
            self.steps,
            self.elapsed.as_secs_f64() * 1000.0
        )
    }
}

/// Runs scenarios on a dedicated runtime.
pub struct Runner {
    runtime: Runtime,
}

impl Runner {
    /// Creates a runner over a new runtime built from `config`.
    ///
    /// # Errors
    ///
    /// Returns `CliError::Config` if the configuration is rejected.
    pub fn new(config: RuntimeConfig) -> CliResult<Self> {
        let runtime = Runtime::new(config).map_err(CliError::Config)?;
        Ok(Self { runtime })
    }

    /// Creates a runner from parsed command line arguments.
    ///
    /// The configuration file, when given, is loaded first and
    /// `--workers` overrides its worker count.
    ///
    /// # Errors
    ///
    /// Returns `CliError::Config` if the file cannot be read or parsed, or if
    /// the resulting configuration is invalid.
    pub fn from_cli(cli: &Cli) -> CliResult<Self> {
        let mut config = match &cli.config {
            Some(path) => RuntimeConfig::from_file(path).map_err(CliError::Config)?,
            None => RuntimeConfig::default(),
        };
        if let Some(workers) = cli.workers {
            config = config.with_worker_threads(workers);
        }
        config.validate().map_err(CliError::Config)?;
        Self::new(config)
    }

    /// The runtime scenarios run on.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Runs `scenario` to completion and reports on it.
    ///
    /// # Errors
    ///
    /// Returns `CliError::Runtime` if the runtime could not schedule the
    /// scenario's work.
    pub fn run(&self, scenario: Scenario) -> CliResult<Report> {
        tracing::info!(scenario = scenario.name(), "running scenario");
        let started = Instant::now();
        let steps = Arc::new(AtomicUsize::new(0));

        let outcome = match scenario {
            Scenario::Sequential => self.run_plan(timed_steps(3, steps.clone()))?,
            Scenario::Parallel => self.run_plan(fan_out(steps.clone()))?,
            Scenario::Timeout => self.run_plan(|op: &Operation| {
                iter::once(PlanStep::Ok(op.create(SHORT_TIMEOUT)))
            })?,
            Scenario::Deferred => self.run_deferred(steps.clone())?,
            Scenario::Trampoline => {
                self.run_plan(synchronous_steps(TRAMPOLINE_STEPS, steps.clone()))?
            }
        };

        let report = Report {
            scenario,
            outcome,
            steps: steps.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };
        tracing::info!(%report, "scenario finished");
        Ok(report)
    }

    fn run_plan<P: ExecutionPlan>(&self, plan: P) -> CliResult<Outcome> {
        let promise = Promise::new();
        let finished = promise.future();
        self.runtime.start(plan, move |run: &Operation| {
            let outcome = if run.timed_out() {
                Outcome::TimedOut
            } else {
                match run.end() {
                    Ok(()) => Outcome::Completed,
                    Err(error) => Outcome::Failed(error.to_string()),
                }
            };
            promise.set_result(outcome);
        });
        Ok(finished.result()?)
    }

    fn run_deferred(&self, fired: Arc<AtomicUsize>) -> CliResult<Outcome> {
        let scheduler = self.runtime.deferred_scheduler()?;
        let order = Arc::new(Mutex::new(Vec::new()));
        let promise = Promise::new();
        let all_fired = promise.future();

        for delay in DEFERRED_DELAYS_MS {
            let order = order.clone();
            let fired = fired.clone();
            let promise = promise.clone();
            scheduler.queue_task(
                move || {
                    order.lock().push(delay);
                    if fired.fetch_add(1, Ordering::SeqCst) + 1 == DEFERRED_DELAYS_MS.len() {
                        promise.set_result(());
                    }
                },
                Duration::from_millis(delay),
            );
        }

        // Tasks due in the same poll pass run on different workers, so the
        // recorded order is informational only.
        let outcome = if all_fired.wait_timeout(STEP_TIMEOUT) {
            tracing::debug!(order = ?order.lock(), "deferred tasks fired");
            Outcome::Completed
        } else {
            Outcome::TimedOut
        };
        scheduler.shutdown();
        Ok(outcome)
    }
}

/// `count` steps, each completed from a timer callback after a short delay.
fn timed_steps(count: usize, done_steps: Arc<AtomicUsize>) -> impl ExecutionPlan {
    move |op: &Operation| {
        let op = op.clone();
        (0..count).map(move |_| -> PlanStep {
            let runtime = op.runtime().clone();
            let done_steps = done_steps.clone();
            Ok(op.create_from_callback(
                move |completer| {
                    runtime.schedule(
                        STEP_DELAY,
                        Box::new(move || {
                            done_steps.fetch_add(1, Ordering::SeqCst);
                            completer.complete();
                        }),
                    );
                },
                STEP_TIMEOUT,
            ))
        })
    }
}

/// `count` steps that complete before they are yielded.
fn synchronous_steps(count: usize, done_steps: Arc<AtomicUsize>) -> impl ExecutionPlan {
    move |op: &Operation| {
        let op = op.clone();
        (0..count).map(move |_| -> PlanStep {
            let done_steps = done_steps.clone();
            Ok(op.create_from_callback(
                move |completer| {
                    done_steps.fetch_add(1, Ordering::SeqCst);
                    completer.complete();
                },
                STEP_TIMEOUT,
            ))
        })
    }
}

/// Three timed plans of one, two and three steps under a single parent.
fn fan_out(done_steps: Arc<AtomicUsize>) -> impl ExecutionPlan {
    move |op: &Operation| {
        let plans: Vec<Plan> = (1..=3)
            .map(|count| Plan::new(timed_steps(count, done_steps.clone())))
            .collect();
        let parallel = op.create_parallel(STEP_TIMEOUT, plans);
        let joined = parallel.clone();
        iter::once(parallel).chain(
            iter::once_with(move || joined.and_then(|child| child.end()))
                .filter_map(|ended| ended.err().map(Err)),
        )
    }
}
