//! Unit tests for AsyncError and ErrorKind

use core_types::{AsyncError, ErrorKind};
use std::error::Error as StdError;
use std::fmt;

#[cfg(test)]
mod error_kind_tests {
    use super::*;

    #[test]
    fn test_error_kind_display_names() {
        let names = [
            (ErrorKind::Timeout, "timeout"),
            (ErrorKind::Canceled, "canceled"),
            (ErrorKind::InvalidOperation, "invalid operation"),
            (ErrorKind::InvalidArgument, "invalid argument"),
            (ErrorKind::Aggregate, "aggregate failure"),
            (ErrorKind::Panicked, "panicked"),
            (ErrorKind::Scheduling, "scheduling failure"),
            (ErrorKind::Application, "application error"),
        ];
        for (kind, name) in names {
            assert_eq!(kind.to_string(), name);
        }
    }

    #[test]
    fn test_error_kind_equality() {
        assert_eq!(ErrorKind::Timeout, ErrorKind::Timeout);
        assert_ne!(ErrorKind::Timeout, ErrorKind::Canceled);
    }
}

#[cfg(test)]
mod constructor_tests {
    use super::*;

    #[test]
    fn test_constructors_set_kind() {
        assert_eq!(AsyncError::timeout("t").kind(), ErrorKind::Timeout);
        assert_eq!(AsyncError::canceled("c").kind(), ErrorKind::Canceled);
        assert_eq!(
            AsyncError::invalid_operation("o").kind(),
            ErrorKind::InvalidOperation
        );
        assert_eq!(
            AsyncError::invalid_argument("a").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(AsyncError::aggregate("g").kind(), ErrorKind::Aggregate);
        assert_eq!(AsyncError::scheduling("s").kind(), ErrorKind::Scheduling);
        assert_eq!(AsyncError::application("x").kind(), ErrorKind::Application);
    }

    #[test]
    fn test_error_display_includes_kind_and_message() {
        let error = AsyncError::timeout("Timed out after 0.05 seconds");
        assert_eq!(error.to_string(), "timeout: Timed out after 0.05 seconds");
    }

    #[test]
    fn test_is_timeout() {
        assert!(AsyncError::timeout("late").is_timeout());
        assert!(!AsyncError::canceled("gone").is_timeout());
    }

    #[test]
    fn test_call_site_points_at_constructor_caller() {
        let line = line!() + 1;
        let error = AsyncError::application("here");
        assert!(error.call_site().file.ends_with("test_error.rs"));
        assert_eq!(error.call_site().line, line);
    }
}

#[cfg(test)]
mod source_chain_tests {
    use super::*;

    #[derive(Debug)]
    struct Refused;

    impl fmt::Display for Refused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("connection refused")
        }
    }

    impl StdError for Refused {}

    #[test]
    fn test_source_is_exposed() {
        let error = AsyncError::with_source(ErrorKind::Application, "fetch failed", Refused);
        assert_eq!(error.source().unwrap().to_string(), "connection refused");
    }

    #[test]
    fn test_source_survives_clone() {
        let error = AsyncError::with_source(ErrorKind::Application, "fetch failed", Refused);
        let clone = error.clone();
        assert!(clone.source().is_some());
        assert!(clone.same_origin(&error));
    }
}

#[cfg(test)]
mod panic_tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_caught_panic_becomes_panicked_error() {
        let payload = panic::catch_unwind(|| panic!("worker exploded")).unwrap_err();
        let error = AsyncError::from_panic(payload);

        assert_eq!(error.kind(), ErrorKind::Panicked);
        assert_eq!(error.message(), "worker exploded");
    }

    #[test]
    fn test_formatted_panic_message() {
        let payload = panic::catch_unwind(|| panic!("step {} failed", 3)).unwrap_err();
        assert_eq!(AsyncError::from_panic(payload).message(), "step 3 failed");
    }
}
