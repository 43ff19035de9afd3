//! Git repository operations

use std::path::Path;

use anyhow::{Context, Result};
use git2::{Commit, ErrorCode, Repository, Signature, Status, StatusOptions};
use tracing::debug;

/// Author used when the repository has no `user.name`/`user.email` configured.
const FALLBACK_AUTHOR: (&str, &str) = ("auto-commit", "auto-commit@localhost");

/// Git repository wrapper
pub struct GitRepository {
    repo: Repository,
}

/// Working directory status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingDirectoryStatus {
    /// Whether the working directory has no changes
    pub clean: bool,
    /// List of files with uncommitted changes
    pub changes: Vec<FileStatus>,
}

/// File status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// Git status flags (e.g., "A ", "??", " M")
    pub status: String,
    /// Path to the file relative to repository root
    pub file: String,
}

impl GitRepository {
    /// Open repository rooted exactly at the specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::open(path.as_ref()).with_context(|| {
            format!("Failed to open git repository at {}", path.as_ref().display())
        })?;

        Ok(Self { repo })
    }

    /// Initialize a new repository at the specified path
    pub fn init_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::init(path.as_ref()).with_context(|| {
            format!("Failed to initialize git repository at {}", path.as_ref().display())
        })?;

        Ok(Self { repo })
    }

    /// Check whether the path is the root of a git repository
    pub fn exists_at<P: AsRef<Path>>(path: P) -> bool {
        Repository::open(path.as_ref()).is_ok()
    }

    /// Get access to the underlying git2::Repository
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Get working directory status, listing every untracked file individually
    pub fn get_working_directory_status(&self) -> Result<WorkingDirectoryStatus> {
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = self
            .repo
            .statuses(Some(&mut options))
            .context("Failed to get repository status")?;

        let changes: Vec<FileStatus> = statuses
            .iter()
            .filter_map(|entry| {
                entry.path().map(|path| FileStatus {
                    status: format_status_flags(entry.status()),
                    file: path.to_string(),
                })
            })
            .collect();

        Ok(WorkingDirectoryStatus {
            clean: changes.is_empty(),
            changes,
        })
    }

    /// Stage the given root-relative paths; paths missing from disk are staged as deletions
    pub fn stage_paths(&self, paths: &[String]) -> Result<()> {
        let workdir = self
            .repo
            .workdir()
            .context("Repository has no working directory")?;
        let mut index = self.repo.index().context("Failed to open index")?;

        for path in paths {
            let relative = Path::new(path);
            if workdir.join(relative).exists() {
                index
                    .add_path(relative)
                    .with_context(|| format!("Failed to stage {path}"))?;
            } else {
                index
                    .remove_path(relative)
                    .with_context(|| format!("Failed to stage deletion of {path}"))?;
            }
        }

        index.write().context("Failed to write index")?;
        debug!(count = paths.len(), "Staged paths");
        Ok(())
    }

    /// Reset index entries for the given paths back to HEAD
    pub fn unstage_paths(&self, paths: &[String]) -> Result<()> {
        let head_commit = self.head_commit()?;
        self.repo
            .reset_default(
                head_commit.as_ref().map(Commit::as_object),
                paths.iter().map(String::as_str),
            )
            .context("Failed to unstage paths")?;
        debug!(count = paths.len(), "Unstaged paths");
        Ok(())
    }

    /// Get the diff between HEAD and the index as patch text
    pub fn get_staged_diff(&self) -> Result<String> {
        let head_commit = self.head_commit()?;
        let head_tree = head_commit
            .as_ref()
            .map(Commit::tree)
            .transpose()
            .context("Failed to get HEAD tree")?;
        let index = self.repo.index().context("Failed to open index")?;

        let diff = self
            .repo
            .diff_tree_to_index(head_tree.as_ref(), Some(&index), None)
            .context("Failed to create staged diff")?;

        let mut diff_content = String::new();
        diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
            let content = std::str::from_utf8(line.content()).unwrap_or("<binary>");
            if let origin @ ('+' | '-' | ' ') = line.origin() {
                diff_content.push(origin);
            }
            diff_content.push_str(content);
            true
        })
        .context("Failed to format diff")?;

        Ok(diff_content)
    }

    /// Commit the current index on top of HEAD and return the new commit id
    pub fn commit_index(&self, message: &str) -> Result<String> {
        let signature = self.signature()?;
        let mut index = self.repo.index().context("Failed to open index")?;
        let tree_id = index.write_tree().context("Failed to write tree")?;
        let tree = self
            .repo
            .find_tree(tree_id)
            .context("Failed to find written tree")?;

        let parent = self.head_commit()?;
        let parents: Vec<&Commit> = parent.iter().collect();

        let oid = self
            .repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                message,
                &tree,
                &parents,
            )
            .context("Failed to create commit")?;

        Ok(oid.to_string())
    }

    /// List every path currently in the index
    pub fn tracked_files(&self) -> Result<Vec<String>> {
        let index = self.repo.index().context("Failed to open index")?;
        Ok(index
            .iter()
            .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
            .collect())
    }

    /// HEAD commit, or `None` on an unborn branch
    fn head_commit(&self) -> Result<Option<Commit<'_>>> {
        match self.repo.head() {
            Ok(head) => Ok(Some(
                head.peel_to_commit()
                    .context("Failed to peel HEAD to commit")?,
            )),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to get HEAD reference"),
        }
    }

    fn signature(&self) -> Result<Signature<'static>> {
        match self.repo.signature() {
            Ok(signature) => Ok(signature.to_owned()),
            Err(_) => Signature::now(FALLBACK_AUTHOR.0, FALLBACK_AUTHOR.1)
                .context("Failed to build commit signature"),
        }
    }
}

/// Format git status flags into string representation
fn format_status_flags(flags: Status) -> String {
    let mut status = String::new();

    if flags.contains(Status::INDEX_NEW) {
        status.push('A');
    } else if flags.contains(Status::INDEX_MODIFIED) {
        status.push('M');
    } else if flags.contains(Status::INDEX_DELETED) {
        status.push('D');
    } else if flags.contains(Status::INDEX_RENAMED) {
        status.push('R');
    } else if flags.contains(Status::INDEX_TYPECHANGE) {
        status.push('T');
    } else if flags.contains(Status::WT_NEW) {
        status.push('?');
    } else {
        status.push(' ');
    }

    if flags.contains(Status::WT_NEW) {
        status.push('?');
    } else if flags.contains(Status::WT_MODIFIED) {
        status.push('M');
    } else if flags.contains(Status::WT_DELETED) {
        status.push('D');
    } else if flags.contains(Status::WT_TYPECHANGE) {
        status.push('T');
    } else if flags.contains(Status::WT_RENAMED) {
        status.push('R');
    } else {
        status.push(' ');
    }

    status
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, GitRepository) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init_at(dir.path()).unwrap();
        let mut config = repo.repository().config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        (dir, repo)
    }

    #[test]
    fn fresh_repository_is_clean() {
        let (_dir, repo) = init_repo();
        let status = repo.get_working_directory_status().unwrap();
        assert!(status.clean);
        assert!(repo.tracked_files().unwrap().is_empty());
    }

    #[test]
    fn untracked_files_are_listed_individually() {
        let (dir, repo) = init_repo();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/nested/a.rs"), "fn a() {}\n").unwrap();

        let status = repo.get_working_directory_status().unwrap();
        assert!(!status.clean);
        assert_eq!(
            status.changes,
            vec![FileStatus {
                status: "??".to_string(),
                file: "src/nested/a.rs".to_string(),
            }]
        );
    }

    #[test]
    fn stage_diff_and_commit_on_unborn_branch() {
        let (dir, repo) = init_repo();
        fs::write(dir.path().join("hello.txt"), "hello\n").unwrap();

        repo.stage_paths(&["hello.txt".to_string()]).unwrap();
        let diff = repo.get_staged_diff().unwrap();
        assert!(diff.contains("+hello"));

        let id = repo.commit_index("feat: add greeting").unwrap();
        assert_eq!(id.len(), 40);
        assert!(repo.get_working_directory_status().unwrap().clean);
        assert_eq!(repo.tracked_files().unwrap(), vec!["hello.txt".to_string()]);

        let head = repo.repository().head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.message(), Some("feat: add greeting"));
        assert_eq!(head.author().name(), Some("Test User"));
    }

    #[test]
    fn staging_a_missing_path_records_deletion() {
        let (dir, repo) = init_repo();
        fs::write(dir.path().join("gone.txt"), "bye\n").unwrap();
        repo.stage_paths(&["gone.txt".to_string()]).unwrap();
        repo.commit_index("chore: add file").unwrap();

        fs::remove_file(dir.path().join("gone.txt")).unwrap();
        repo.stage_paths(&["gone.txt".to_string()]).unwrap();
        let diff = repo.get_staged_diff().unwrap();
        assert!(diff.contains("-bye"));

        repo.commit_index("chore: remove file").unwrap();
        assert!(repo.tracked_files().unwrap().is_empty());
    }

    #[test]
    fn unstage_restores_head_state() {
        let (dir, repo) = init_repo();
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        repo.stage_paths(&["a.txt".to_string()]).unwrap();
        repo.commit_index("chore: add a").unwrap();

        fs::write(dir.path().join("a.txt"), "two\n").unwrap();
        fs::write(dir.path().join("b.txt"), "new\n").unwrap();
        let paths = vec!["a.txt".to_string(), "b.txt".to_string()];
        repo.stage_paths(&paths).unwrap();
        assert!(!repo.get_staged_diff().unwrap().is_empty());

        repo.unstage_paths(&paths).unwrap();

        assert!(repo.get_staged_diff().unwrap().is_empty());
        let status = repo.get_working_directory_status().unwrap();
        let flags: Vec<(String, String)> = status
            .changes
            .into_iter()
            .map(|c| (c.file, c.status))
            .collect();
        assert!(flags.contains(&("a.txt".to_string(), " M".to_string())));
        assert!(flags.contains(&("b.txt".to_string(), "??".to_string())));
    }

    #[test]
    fn unstage_on_unborn_branch_removes_entries() {
        let (dir, repo) = init_repo();
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        repo.stage_paths(&["a.txt".to_string()]).unwrap();

        repo.unstage_paths(&["a.txt".to_string()]).unwrap();

        assert!(repo.tracked_files().unwrap().is_empty());
    }

    #[test]
    fn status_flags_format() {
        assert_eq!(format_status_flags(Status::WT_NEW), "??");
        assert_eq!(format_status_flags(Status::WT_MODIFIED), " M");
        assert_eq!(format_status_flags(Status::INDEX_NEW), "A ");
        assert_eq!(
            format_status_flags(Status::INDEX_MODIFIED | Status::WT_MODIFIED),
            "MM"
        );
    }
}
