//! The operation set the dispatcher needs from version control.

use std::path::Path;

use anyhow::Result;
use tracing::info;

use super::repository::{GitRepository, WorkingDirectoryStatus};

/// Stage/commit/diff/status/init over a working tree addressed by its root.
///
/// Every call is a short local operation. Implementations are shared across
/// workers, but the dispatcher never issues two calls for the same root at
/// the same time.
pub trait RepositoryGateway: Send + Sync {
    /// Returns true if `root` is already the top of a repository.
    fn is_repository(&self, root: &Path) -> bool;

    /// Creates an empty repository at `root`.
    fn init(&self, root: &Path) -> Result<()>;

    /// Lists every uncommitted change, untracked files included.
    fn status(&self, root: &Path) -> Result<WorkingDirectoryStatus>;

    /// Stages root-relative paths; paths missing on disk are staged as deletions.
    fn stage(&self, root: &Path, paths: &[String]) -> Result<()>;

    /// Resets index entries for root-relative paths back to HEAD.
    fn unstage(&self, root: &Path, paths: &[String]) -> Result<()>;

    /// Patch text of what is currently staged.
    fn diff(&self, root: &Path) -> Result<String>;

    /// Commits the index and returns the new commit id.
    fn commit(&self, root: &Path, message: &str) -> Result<String>;

    /// Paths currently tracked by the index.
    fn tracked_files(&self, root: &Path) -> Result<Vec<String>>;
}

/// [`RepositoryGateway`] backed by libgit2.
///
/// A repository handle is opened per call so the gateway itself holds no
/// per-repository state.
#[derive(Debug, Default, Clone, Copy)]
pub struct Git2Gateway;

impl Git2Gateway {
    /// Creates the gateway.
    pub fn new() -> Self {
        Self
    }
}

impl RepositoryGateway for Git2Gateway {
    fn is_repository(&self, root: &Path) -> bool {
        GitRepository::exists_at(root)
    }

    fn init(&self, root: &Path) -> Result<()> {
        GitRepository::init_at(root)?;
        info!(root = %root.display(), "Initialized repository");
        Ok(())
    }

    fn status(&self, root: &Path) -> Result<WorkingDirectoryStatus> {
        GitRepository::open_at(root)?.get_working_directory_status()
    }

    fn stage(&self, root: &Path, paths: &[String]) -> Result<()> {
        GitRepository::open_at(root)?.stage_paths(paths)
    }

    fn unstage(&self, root: &Path, paths: &[String]) -> Result<()> {
        GitRepository::open_at(root)?.unstage_paths(paths)
    }

    fn diff(&self, root: &Path) -> Result<String> {
        GitRepository::open_at(root)?.get_staged_diff()
    }

    fn commit(&self, root: &Path, message: &str) -> Result<String> {
        GitRepository::open_at(root)?.commit_index(message)
    }

    fn tracked_files(&self, root: &Path) -> Result<Vec<String>> {
        GitRepository::open_at(root)?.tracked_files()
    }
}
