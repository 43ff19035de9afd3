//! Git operations behind the repository gateway.

pub mod gateway;
pub mod repository;

pub use gateway::{Git2Gateway, RepositoryGateway};
pub use repository::{FileStatus, GitRepository, WorkingDirectoryStatus};

/// Number of hex characters to show in abbreviated commit hashes.
pub const SHORT_HASH_LEN: usize = 8;
