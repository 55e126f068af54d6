//! Error types for the asynchronous execution runtime.
//!
//! Every failure observed through a future, an operation run or a combinator
//! is an [`AsyncError`]. Errors are cheap to clone and clones share the call
//! site and backtrace captured when the error was first constructed, so an
//! error that is stored once and re-raised to many consumers keeps its
//! original stack information.

use crate::CallSite;
use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The category of an [`AsyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A timer fired before the awaited work completed
    Timeout,
    /// An upstream future was canceled
    Canceled,
    /// The API was used in a way its state does not allow
    InvalidOperation,
    /// An argument was rejected before any work started
    InvalidArgument,
    /// Several inputs failed and only a summary is reported
    Aggregate,
    /// User code panicked and the panic was captured
    Panicked,
    /// Work could not be handed to a worker thread or timer
    Scheduling,
    /// An error raised by application code
    Application,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Canceled => "canceled",
            ErrorKind::InvalidOperation => "invalid operation",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Aggregate => "aggregate failure",
            ErrorKind::Panicked => "panicked",
            ErrorKind::Scheduling => "scheduling failure",
            ErrorKind::Application => "application error",
        };
        f.write_str(name)
    }
}

/// An error produced by the asynchronous execution runtime.
///
/// # Examples
///
/// ```
/// use core_types::{AsyncError, ErrorKind};
///
/// let error = AsyncError::invalid_operation("An operation cannot yield itself.");
/// assert_eq!(error.kind(), ErrorKind::InvalidOperation);
/// assert_eq!(error.message(), "An operation cannot yield itself.");
/// assert_eq!(
///     error.to_string(),
///     "invalid operation: An operation cannot yield itself."
/// );
/// ```
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct AsyncError {
    kind: ErrorKind,
    message: Arc<str>,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync + 'static>>,
    call_site: CallSite,
    trace: Arc<Backtrace>,
}

impl AsyncError {
    /// Creates an error of the given kind.
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Arc::from(message.into()),
            source: None,
            call_site: CallSite::caller(),
            trace: Arc::new(Backtrace::capture()),
        }
    }

    /// Creates an error of the given kind that wraps an underlying cause.
    #[track_caller]
    pub fn with_source<E>(kind: ErrorKind, message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let mut error = Self::new(kind, message);
        error.source = Some(Arc::new(source));
        error
    }

    /// Creates a [`ErrorKind::Timeout`] error.
    #[track_caller]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Creates a [`ErrorKind::Canceled`] error.
    #[track_caller]
    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, message)
    }

    /// Creates a [`ErrorKind::InvalidOperation`] error.
    #[track_caller]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation, message)
    }

    /// Creates a [`ErrorKind::InvalidArgument`] error.
    #[track_caller]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Creates a [`ErrorKind::Aggregate`] error.
    #[track_caller]
    pub fn aggregate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aggregate, message)
    }

    /// Creates a [`ErrorKind::Scheduling`] error.
    #[track_caller]
    pub fn scheduling(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Scheduling, message)
    }

    /// Creates a [`ErrorKind::Application`] error.
    #[track_caller]
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Application, message)
    }

    /// Converts a captured panic payload into a [`ErrorKind::Panicked`] error.
    #[track_caller]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        Self::new(ErrorKind::Panicked, message)
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns where this error was first constructed.
    pub fn call_site(&self) -> CallSite {
        self.call_site
    }

    /// Returns the backtrace captured when this error was first constructed.
    ///
    /// The backtrace is only populated when `RUST_BACKTRACE` or
    /// `RUST_LIB_BACKTRACE` enables capture.
    pub fn backtrace(&self) -> &Backtrace {
        &self.trace
    }

    /// Returns true if the error is a [`ErrorKind::Timeout`].
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// Returns true if `other` is a clone of this error rather than an
    /// independently constructed one.
    pub fn same_origin(&self, other: &AsyncError) -> bool {
        Arc::ptr_eq(&self.trace, &other.trace)
    }
}
