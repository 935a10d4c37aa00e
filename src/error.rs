//! Errors.

use std::{fmt::Display, io, sync::Arc, time::Duration};

use thiserror::Error;

/// An error which aborted a batch.
///
/// Cancellation is not an error: cancelled elements are reported as
/// [`Status::Cancel`](crate::Status::Cancel) in the [`BatchResult`](crate::BatchResult).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum BatchError<E: Display> {
    /// An interrupt listener could not be installed. No work was started.
    ///
    /// Unrecoverable.
    #[error("Unable to install interrupt listener")]
    InterruptInstallation(#[source] Arc<io::Error>),

    /// A work unit failed.
    ///
    /// In concurrent mode, other work units were allowed to finish first.
    #[error("Work unit {index} failed")]
    WorkFailed {
        /// The position of the failed element in the input.
        index: usize,
        /// The error returned by the work unit.
        #[source]
        error: E,
    },

    /// Concurrent work units did not all finish in time.
    ///
    /// Unrecoverable.
    #[error("Timed out after {0:?} waiting for work units to finish")]
    WaitTimeout(Duration),

    /// A concurrent work unit panicked.
    #[error("A work unit panicked")]
    Panic,
}

/// Result type for batch operations.
pub type RunResult<T, E> = std::result::Result<T, BatchError<E>>;

impl<E: Display> From<io::Error> for BatchError<E> {
    fn from(err: io::Error) -> Self {
        BatchError::InterruptInstallation(Arc::new(err))
    }
}

impl<E> BatchError<E>
where
    E: Display,
{
    /// Get the inner error for work unit failures, otherwise self.
    pub fn inner(self) -> RunResult<E, E> {
        match self {
            BatchError::WorkFailed { error, .. } => Ok(error),
            _ => Err(self),
        }
    }
}
