//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration.

use core_types::{AsyncError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a [`Runtime`](crate::Runtime).
///
/// # Examples
///
/// ```
/// use async_runtime::RuntimeConfig;
///
/// let config = RuntimeConfig::from_json_str(r#"{ "worker_threads": 3 }"#).unwrap();
/// assert_eq!(config.worker_threads, 3);
/// assert_eq!(config.max_synchronous_depth, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads in the pool
    pub worker_threads: usize,
    /// Prefix used to name worker threads
    pub thread_name_prefix: String,
    /// Consecutive synchronous plan resumptions allowed on one thread before
    /// the next step is handed to a worker
    pub max_synchronous_depth: usize,
    /// Tick interval of the deferred task scheduler, in milliseconds
    pub deferred_poll_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2);
        RuntimeConfig {
            worker_threads: workers,
            thread_name_prefix: "async-worker".to_string(),
            max_synchronous_depth: 100,
            deferred_poll_interval_ms: 10,
        }
    }
}

impl RuntimeConfig {
    /// Parses and validates a configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, AsyncError> {
        let config: RuntimeConfig = serde_json::from_str(text).map_err(|e| {
            AsyncError::with_source(ErrorKind::InvalidArgument, "malformed runtime configuration", e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AsyncError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AsyncError::with_source(
                ErrorKind::InvalidArgument,
                format!("cannot read runtime configuration {}", path.display()),
                e,
            )
        })?;
        Self::from_json_str(&text)
    }

    /// Checks that the configuration describes a usable runtime.
    pub fn validate(&self) -> Result<(), AsyncError> {
        if self.worker_threads == 0 {
            return Err(AsyncError::invalid_argument(
                "worker_threads must be at least 1",
            ));
        }
        if self.deferred_poll_interval_ms == 0 {
            return Err(AsyncError::invalid_argument(
                "deferred_poll_interval_ms must be at least 1",
            ));
        }
        Ok(())
    }

    /// Sets the number of worker threads.
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    /// Sets the synchronous recursion threshold.
    pub fn with_max_synchronous_depth(mut self, depth: usize) -> Self {
        self.max_synchronous_depth = depth;
        self
    }

    /// Tick interval of the deferred task scheduler.
    pub fn deferred_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deferred_poll_interval_ms)
    }
}
