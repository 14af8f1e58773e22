//! The error taxonomy shared by tasks, polling loops and subscriptions.

use std::{borrow::Cow, error, fmt, ops, sync::Arc};
use thiserror::Error;

/// A result whose error is the runtime [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors produced or observed by the runtime.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The unit of work observed its own cancellation and stopped.
    ///
    /// This is expected under normal operation and is never surfaced to the
    /// user.
    #[error("operation was canceled")]
    Canceled,
    /// The task, query or subscription operation itself failed.
    #[error(transparent)]
    Operation(OperationError),
    /// Scheduling the next continuation of a loop failed.
    #[error("failed to schedule the next iteration: {0}")]
    Scheduling(OperationError),
    /// An operation was called at a point where it cannot proceed.
    #[error("invalid state: {0}")]
    InvalidState(Cow<'static, str>),
}

impl Error {
    /// Wraps any error as an [`Error::Operation`].
    pub fn operation(err: impl error::Error + Send + Sync + 'static) -> Self {
        Error::Operation(OperationError::new(err))
    }

    /// Creates an [`Error::Operation`] from a message.
    pub fn msg(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Operation(OperationError::msg(message))
    }

    /// Wraps any error as an [`Error::Scheduling`].
    pub fn scheduling(err: impl error::Error + Send + Sync + 'static) -> Self {
        Error::Scheduling(OperationError::new(err))
    }

    /// Whether this error represents voluntary cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}

impl From<OperationError> for Error {
    fn from(value: OperationError) -> Self {
        Error::Operation(value)
    }
}

impl From<crate::cancel::Canceled> for Error {
    fn from(_: crate::cancel::Canceled) -> Self {
        Error::Canceled
    }
}

/// A cloneable wrapper for any error raised by an operation.
#[derive(Debug, Clone)]
#[repr(transparent)]
pub struct OperationError(Arc<dyn error::Error + Send + Sync>);

impl OperationError {
    pub fn new(err: impl error::Error + Send + Sync + 'static) -> Self {
        OperationError(Arc::new(err))
    }

    pub fn msg(message: impl Into<Cow<'static, str>>) -> Self {
        OperationError(Arc::new(Message(message.into())))
    }

    /// Converts the wrapper into the inner reference-counted error.
    pub fn into_inner(self) -> Arc<dyn error::Error + Send + Sync> {
        self.0
    }

    /// Attempts to view the inner error as a concrete type.
    pub fn downcast_ref<E: error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl ops::Deref for OperationError {
    type Target = Arc<dyn error::Error + Send + Sync>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl error::Error for OperationError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(Cow<'static, str>);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskOnFire;

    #[test]
    fn operation_errors_keep_their_source() {
        let err = Error::operation(DiskOnFire);
        assert_eq!(err.to_string(), "disk on fire");
        let Error::Operation(inner) = &err else {
            panic!("expected an operation error");
        };
        assert!(inner.downcast_ref::<DiskOnFire>().is_some());
        assert!(!err.is_cancellation());
    }

    #[test]
    fn canceled_is_cancellation() {
        assert!(Error::Canceled.is_cancellation());
        assert!(!Error::msg("nope").is_cancellation());
        assert_eq!(
            Error::InvalidState("no arguments".into()).to_string(),
            "invalid state: no arguments"
        );
    }
}
