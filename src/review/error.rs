//! Review queue errors.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::policy::PolicyError;

/// Errors raised by the review queue.
#[derive(Error, Debug)]
pub enum ReviewError {
    /// No item with this id exists.
    #[error("Review item {0} not found")]
    NotFound(Uuid),

    /// The item was already resolved; the decision was not applied again.
    #[error("Review item {0} is already resolved")]
    AlreadyResolved(Uuid),

    /// The queue file could not be read or written.
    #[error("Review queue storage error at {path}: {source}")]
    Storage {
        /// Queue file.
        path: PathBuf,
        /// Underlying I/O or parse error.
        #[source]
        source: std::io::Error,
    },

    /// Classifying the path or writing the pattern failed.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Result alias for review queue operations.
pub type Result<T> = std::result::Result<T, ReviewError>;
