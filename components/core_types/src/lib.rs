//! Core error and diagnostic types for the asynchronous execution runtime.
//!
//! This crate provides the foundational types shared by every component of
//! the runtime: the error taxonomy and the call-site information attached to
//! errors when they are first raised.
//!
//! # Overview
//!
//! - [`AsyncError`] - An error surfaced by a future, an operation or a combinator
//! - [`ErrorKind`] - The category of an [`AsyncError`]
//! - [`CallSite`] - Source location where an error was first constructed
//!
//! # Examples
//!
//! ```
//! use core_types::{AsyncError, ErrorKind};
//!
//! let error = AsyncError::timeout("the operation timed out");
//! assert_eq!(error.kind(), ErrorKind::Timeout);
//!
//! // Clones share the original call site and backtrace.
//! let rethrown = error.clone();
//! assert_eq!(rethrown.call_site(), error.call_site());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod source;

pub use error::{AsyncError, ErrorKind};
pub use source::CallSite;
