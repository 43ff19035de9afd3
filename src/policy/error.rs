//! Policy store and classification errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or writing policy files.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// A policy file exists but could not be read.
    #[error("Failed to read policy file {path}: {source}")]
    Unreadable {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A policy file could not be written.
    #[error("Failed to write policy file {path}: {source}")]
    WriteFailed {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The path handed to the classifier is not inside the repository root.
    #[error("Path {path} is outside repository root {root}")]
    OutsideRoot {
        /// Offending path.
        path: PathBuf,
        /// Repository root.
        root: PathBuf,
    },

    /// A pattern cannot be stored (empty or spans several lines).
    #[error("Invalid pattern {0:?}")]
    InvalidPattern(String),
}

/// Result alias for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
