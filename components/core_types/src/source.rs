//! Source location tracking for errors.
//!
//! Errors record where they were first constructed so that a re-raised error
//! still points at the code that produced it.

use std::fmt;
use std::panic::Location;

/// A position in the Rust source that constructed an error.
///
/// # Examples
///
/// ```
/// use core_types::CallSite;
///
/// let site = CallSite::caller();
/// assert!(site.file.ends_with(".rs"));
/// assert!(site.line > 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Source file path
    pub file: &'static str,
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed)
    pub column: u32,
}

impl CallSite {
    /// Captures the location of the caller.
    ///
    /// Functions marked `#[track_caller]` forward their own caller's location.
    #[track_caller]
    pub fn caller() -> Self {
        Location::caller().into()
    }
}

impl From<&'static Location<'static>> for CallSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
