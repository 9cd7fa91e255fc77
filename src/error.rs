//! Error types for controlled execution.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors carry an
//! [`ErrorKind`], an optional human-readable message, and optionally the
//! operation that raised them.
//!
//! # Error Categories
//!
//! - **Cancellation**: the current iteration was stopped; controlled code
//!   should unwind by propagating the error with `?`
//! - **Bug**: a property violation found by exploration (assertion failure,
//!   livelock, uncontrolled concurrency, fatal step bound)
//! - **Usage**: invalid arguments or configuration
//! - **Trace**: a replayed trace could not be followed
//! - **Internal**: scheduler bugs and invalid states
//! - **User**: errors raised by the code under test

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::runtime::OperationId;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    // === Cancellation ===
    /// The scheduler stopped; the current iteration is over.
    ExecutionCanceled,

    // === Bugs ===
    /// An assertion in the code under test failed, or an operation failed
    /// with an unhandled error.
    AssertionFailure,
    /// A thread the scheduler does not control invoked a scheduling method.
    UncontrolledConcurrency,
    /// No operation is enabled while some are still blocked.
    Livelock,
    /// The step bound was hit and is configured to count as a bug.
    StepBoundReached,

    // === Usage ===
    /// A nondeterministic choice was requested with an empty range.
    InvalidChoice,
    /// An operation id is not registered with the scheduler.
    UnknownOperation,
    /// Invalid configuration value.
    InvalidConfig,

    // === Trace ===
    /// A replayed trace diverged from the program.
    TraceDivergence,

    // === Internal ===
    /// Internal scheduler error.
    Internal,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::ExecutionCanceled => ErrorCategory::Cancellation,
            Self::AssertionFailure
            | Self::UncontrolledConcurrency
            | Self::Livelock
            | Self::StepBoundReached => ErrorCategory::Bug,
            Self::InvalidChoice | Self::UnknownOperation | Self::InvalidConfig => {
                ErrorCategory::Usage
            }
            Self::TraceDivergence => ErrorCategory::Trace,
            Self::Internal => ErrorCategory::Internal,
            Self::User => ErrorCategory::User,
        }
    }
}

/// High-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The iteration was canceled.
    Cancellation,
    /// A bug was found in the code under test.
    Bug,
    /// The API was misused.
    Usage,
    /// Trace replay failures.
    Trace,
    /// Internal scheduler errors.
    Internal,
    /// User-originated errors.
    User,
}

/// The main error type for controlled execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    operation: Option<OperationId>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            operation: None,
        }
    }

    /// Creates the cancellation error returned once the scheduler stops.
    #[must_use]
    pub const fn canceled() -> Self {
        Self::new(ErrorKind::ExecutionCanceled)
    }

    /// Creates a user error with a message.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(message)
    }

    /// Creates an internal error with a message.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Creates a configuration error with a message.
    #[must_use]
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig).with_message(detail)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error only signals the end of the iteration.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self.kind, ErrorKind::ExecutionCanceled)
    }

    /// Returns true if this error reports a bug in the code under test.
    #[must_use]
    pub const fn is_bug(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Bug)
    }

    /// Adds a message to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Records the operation that raised the error.
    #[must_use]
    pub const fn with_operation(mut self, operation: OperationId) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the operation that raised the error, if known.
    #[must_use]
    pub const fn operation(&self) -> Option<OperationId> {
        self.operation
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(op) = self.operation {
            write!(f, " [{op}]")?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// A specialized Result type for controlled execution.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_message() {
        let err = Error::canceled();
        assert_eq!(err.to_string(), "ExecutionCanceled");
    }

    #[test]
    fn display_with_operation_and_message() {
        let err = Error::new(ErrorKind::AssertionFailure)
            .with_operation(OperationId::new(3))
            .with_message("boom");
        assert_eq!(err.to_string(), "AssertionFailure [op#3]: boom");
    }

    #[test]
    fn categories() {
        assert!(Error::canceled().is_canceled());
        assert!(!Error::canceled().is_bug());
        assert!(Error::new(ErrorKind::Livelock).is_bug());
        assert!(Error::new(ErrorKind::UncontrolledConcurrency).is_bug());
        assert!(Error::new(ErrorKind::StepBoundReached).is_bug());
        assert_eq!(
            Error::invalid_config("x").category(),
            ErrorCategory::Usage
        );
        assert_eq!(Error::user("x").category(), ErrorCategory::User);
        assert_eq!(
            ErrorKind::TraceDivergence.category(),
            ErrorCategory::Trace
        );
    }

    #[test]
    fn message_accessors() {
        let err = Error::internal("bad state");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.message(), Some("bad state"));
        assert_eq!(err.operation(), None);
    }
}
