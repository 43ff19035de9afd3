//! Policy files on disk: two scopes, each with an include and an ignore list.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{PolicyError, Result};
use super::pattern::{resolve, PatternSet, PatternSource, Resolution};
use crate::utils::atomic::atomic_write;

/// Project include file name, relative to the repository root.
pub const PROJECT_INCLUDE_FILE: &str = ".gitinclude";

/// Project ignore file name, relative to the repository root.
pub const PROJECT_IGNORE_FILE: &str = ".gitignore";

/// Global include file name, relative to the policy directory.
pub const GLOBAL_INCLUDE_FILE: &str = "gitinclude";

/// Global ignore file name, relative to the policy directory.
pub const GLOBAL_IGNORE_FILE: &str = "gitignore";

/// Where a decision is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// The repository's own policy files.
    Project,
    /// The process-wide policy files.
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project => write!(f, "project"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Include or ignore list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Paths that are always committed.
    Include,
    /// Paths that are never committed.
    Ignore,
}

impl PolicyKind {
    fn source(self, scope: Scope) -> PatternSource {
        match (scope, self) {
            (Scope::Project, Self::Include) => PatternSource::ProjectInclude,
            (Scope::Global, Self::Include) => PatternSource::GlobalInclude,
            (Scope::Project, Self::Ignore) => PatternSource::ProjectIgnore,
            (Scope::Global, Self::Ignore) => PatternSource::GlobalIgnore,
        }
    }
}

/// The four pattern sets that apply to one repository.
#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    /// Project include then global include.
    pub includes: [PatternSet; 2],
    /// Project ignore then global ignore.
    pub ignores: [PatternSet; 2],
}

impl LoadedPolicy {
    /// Classifies a root-relative path against these sets and the defaults.
    pub fn resolve(&self, path: &str, default_ignores: &PatternSet) -> Resolution {
        resolve(path, &self.includes, &self.ignores, default_ignores)
    }
}

/// Reads and appends to the policy files.
///
/// Reads are unsynchronized. Appends are serialized within the process and
/// land through an atomic replace, so a concurrent reader sees either the old
/// or the new file.
#[derive(Debug)]
pub struct PatternStore {
    global_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl PatternStore {
    /// Creates a store whose global files live in `global_dir`.
    pub fn new(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_dir: global_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Directory holding the global policy files.
    pub fn global_dir(&self) -> &Path {
        &self.global_dir
    }

    /// Location of one policy file.
    pub fn file_path(&self, scope: Scope, kind: PolicyKind, root: &Path) -> PathBuf {
        match (scope, kind) {
            (Scope::Project, PolicyKind::Include) => root.join(PROJECT_INCLUDE_FILE),
            (Scope::Project, PolicyKind::Ignore) => root.join(PROJECT_IGNORE_FILE),
            (Scope::Global, PolicyKind::Include) => self.global_dir.join(GLOBAL_INCLUDE_FILE),
            (Scope::Global, PolicyKind::Ignore) => self.global_dir.join(GLOBAL_IGNORE_FILE),
        }
    }

    /// Loads one pattern set. A missing file is an empty set.
    pub fn load(&self, scope: Scope, kind: PolicyKind, root: &Path) -> Result<PatternSet> {
        let path = self.file_path(scope, kind, root);
        let content = read_policy_file(&path)?;
        Ok(PatternSet::parse(kind.source(scope), &content))
    }

    /// Loads all four sets for a repository.
    pub fn load_all(&self, root: &Path) -> Result<LoadedPolicy> {
        Ok(LoadedPolicy {
            includes: [
                self.load(Scope::Project, PolicyKind::Include, root)?,
                self.load(Scope::Global, PolicyKind::Include, root)?,
            ],
            ignores: [
                self.load(Scope::Project, PolicyKind::Ignore, root)?,
                self.load(Scope::Global, PolicyKind::Ignore, root)?,
            ],
        })
    }

    /// Appends a pattern as a new line, creating the file if needed.
    ///
    /// Returns `false` without touching the file if the pattern is already
    /// present.
    pub fn append(
        &self,
        scope: Scope,
        kind: PolicyKind,
        root: &Path,
        pattern: &str,
    ) -> Result<bool> {
        let pattern = pattern.trim();
        if pattern.is_empty() || pattern.contains('\n') {
            return Err(PolicyError::InvalidPattern(pattern.to_string()));
        }

        let path = self.file_path(scope, kind, root);
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut content = read_policy_file(&path)?;
        if PatternSet::parse(kind.source(scope), &content).contains(pattern) {
            debug!(path = %path.display(), pattern, "Pattern already present");
            return Ok(false);
        }

        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(pattern);
        content.push('\n');

        atomic_write(&path, content.as_bytes()).map_err(|source| PolicyError::WriteFailed {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), pattern, %scope, "Appended policy pattern");
        Ok(true)
    }
}

fn read_policy_file(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(PolicyError::Unreadable {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::policy::pattern::Verdict;
    use crate::policy::defaults::default_ignore_set;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, PatternStore) {
        let repo = TempDir::new().unwrap();
        let global = TempDir::new().unwrap();
        let store = PatternStore::new(global.path());
        (repo, global, store)
    }

    #[test]
    fn missing_files_load_as_empty_sets() {
        let (repo, _global, store) = setup();
        let policy = store.load_all(repo.path()).unwrap();
        assert!(policy.includes.iter().all(PatternSet::is_empty));
        assert!(policy.ignores.iter().all(PatternSet::is_empty));
    }

    #[test]
    fn append_creates_project_file_on_first_write() {
        let (repo, _global, store) = setup();

        assert!(store
            .append(Scope::Project, PolicyKind::Include, repo.path(), "docs/")
            .unwrap());

        let written = fs::read_to_string(repo.path().join(PROJECT_INCLUDE_FILE)).unwrap();
        assert_eq!(written, "docs/\n");
    }

    #[test]
    fn append_is_idempotent() {
        let (repo, _global, store) = setup();

        store
            .append(Scope::Global, PolicyKind::Ignore, repo.path(), "*.bak")
            .unwrap();
        let second = store
            .append(Scope::Global, PolicyKind::Ignore, repo.path(), "*.bak")
            .unwrap();

        assert!(!second);
        let written = fs::read_to_string(store.global_dir().join(GLOBAL_IGNORE_FILE)).unwrap();
        assert_eq!(written, "*.bak\n");
    }

    #[test]
    fn append_preserves_existing_content_without_trailing_newline() {
        let (repo, _global, store) = setup();
        fs::write(repo.path().join(PROJECT_IGNORE_FILE), "# mine\ntarget/").unwrap();

        store
            .append(Scope::Project, PolicyKind::Ignore, repo.path(), "*.log")
            .unwrap();

        let written = fs::read_to_string(repo.path().join(PROJECT_IGNORE_FILE)).unwrap();
        assert_eq!(written, "# mine\ntarget/\n*.log\n");
    }

    #[test]
    fn append_rejects_multiline_patterns() {
        let (repo, _global, store) = setup();
        let result = store.append(Scope::Project, PolicyKind::Ignore, repo.path(), "a\nb");
        assert!(matches!(result, Err(PolicyError::InvalidPattern(_))));
    }

    #[test]
    fn unreadable_file_is_a_configuration_error() {
        let (repo, _global, store) = setup();
        // A directory where a file is expected cannot be read as text.
        fs::create_dir(repo.path().join(PROJECT_IGNORE_FILE)).unwrap();

        let result = store.load_all(repo.path());
        assert!(matches!(result, Err(PolicyError::Unreadable { .. })));
    }

    #[test]
    fn loaded_policy_resolves_with_scope_order() {
        let (repo, _global, store) = setup();
        store
            .append(Scope::Global, PolicyKind::Include, repo.path(), "*.md")
            .unwrap();
        store
            .append(Scope::Project, PolicyKind::Ignore, repo.path(), "drafts/")
            .unwrap();

        let policy = store.load_all(repo.path()).unwrap();
        let defaults = default_ignore_set();

        assert_eq!(
            policy.resolve("drafts/plan.md", &defaults).verdict,
            Verdict::Include
        );
        assert_eq!(
            policy.resolve("drafts/plan.txt", &defaults).verdict,
            Verdict::Ignore
        );
    }
}
