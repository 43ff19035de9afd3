//! Classification against the four policy files plus the built-in defaults.

use std::path::{Component, Path};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::defaults::{default_ignore_set, DEFAULT_IGNORE_PATTERNS};
use super::error::{PolicyError, Result};
use super::pattern::{normalize_path, Pattern, PatternSet, Resolution, Verdict};
use super::store::{PatternStore, PolicyKind, Scope};
use crate::git::RepositoryGateway;

/// Name of the directory holding repository internals.
const GIT_DIR: &str = ".git";

/// Returns true for root-relative paths inside the repository's `.git` directory.
pub fn is_repository_internal(relative: &str) -> bool {
    normalize_path(relative)
        .split('/')
        .next()
        .is_some_and(|first| first == GIT_DIR)
}

/// Classifies paths for a repository.
///
/// Policy files are re-read on every call, so edits made by a reviewer or by
/// hand take effect on the next event without a restart.
pub struct ClassificationEngine {
    store: Arc<PatternStore>,
    gateway: Arc<dyn RepositoryGateway>,
    defaults: PatternSet,
}

impl ClassificationEngine {
    /// Creates an engine over the given policy store.
    pub fn new(store: Arc<PatternStore>, gateway: Arc<dyn RepositoryGateway>) -> Self {
        Self {
            store,
            gateway,
            defaults: default_ignore_set(),
        }
    }

    /// The policy store decisions are written to.
    pub fn store(&self) -> &Arc<PatternStore> {
        &self.store
    }

    /// Converts `path` into the normalized form relative to `root`.
    ///
    /// Relative paths are taken as already relative to the root.
    pub fn relative_path(&self, path: &Path, root: &Path) -> Result<String> {
        let outside = || PolicyError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        };

        let relative = if path.is_absolute() {
            match path.strip_prefix(root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => {
                    let canonical_root = root.canonicalize().map_err(|_| outside())?;
                    let canonical_path = canonicalize_lenient(path).ok_or_else(outside)?;
                    canonical_path
                        .strip_prefix(&canonical_root)
                        .map_err(|_| outside())?
                        .to_path_buf()
                }
            }
        } else {
            path.to_path_buf()
        };

        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(outside());
        }

        let relative = normalize_path(&relative.to_string_lossy());
        if relative.is_empty() {
            return Err(outside());
        }
        Ok(relative)
    }

    /// Resolves a path without any side effect.
    pub fn resolve(&self, path: &Path, root: &Path) -> Result<Resolution> {
        let relative = self.relative_path(path, root)?;
        let policy = self.store.load_all(root)?;
        Ok(policy.resolve(&relative, &self.defaults))
    }

    /// Classifies a path.
    ///
    /// When the deciding rule is a built-in default, the pattern is also
    /// recorded in the project ignore file unless a tracked file matches it.
    /// Failing to record it never fails the classification.
    pub fn classify(&self, path: &Path, root: &Path) -> Result<Resolution> {
        let resolution = self.resolve(path, root)?;
        debug!(
            root = %root.display(),
            path = %path.display(),
            verdict = %resolution.verdict,
            "Classified path"
        );

        if resolution.verdict == Verdict::Ignore && resolution.decided_by_default() {
            if let Some(rule) = &resolution.rule {
                self.persist_default(root, &rule.pattern);
            }
        }

        Ok(resolution)
    }

    /// Records every built-in default pattern in the project ignore file,
    /// skipping those that match a tracked file. Returns the patterns added.
    pub fn seed_default_ignores(&self, root: &Path) -> Result<Vec<String>> {
        let tracked = match self.gateway.tracked_files(root) {
            Ok(tracked) => tracked,
            Err(e) => {
                warn!(root = %root.display(), "Cannot list tracked files, not seeding defaults: {e:#}");
                return Ok(Vec::new());
            }
        };

        let mut added = Vec::new();
        for raw in DEFAULT_IGNORE_PATTERNS {
            let Ok(pattern) = Pattern::new(raw) else {
                continue;
            };
            if let Some(file) = tracked.iter().find(|file| pattern.matches(file)) {
                debug!(pattern = raw, file = %file, "Tracked file matches default, not seeding");
                continue;
            }
            if self
                .store
                .append(Scope::Project, PolicyKind::Ignore, root, raw)?
            {
                added.push((*raw).to_string());
            }
        }

        info!(root = %root.display(), count = added.len(), "Seeded default ignore patterns");
        Ok(added)
    }

    fn persist_default(&self, root: &Path, raw: &str) {
        let tracked = match self.gateway.tracked_files(root) {
            Ok(tracked) => tracked,
            Err(e) => {
                warn!(
                    root = %root.display(),
                    pattern = raw,
                    "Cannot list tracked files, not recording default pattern: {e:#}"
                );
                return;
            }
        };

        let Ok(pattern) = Pattern::new(raw) else {
            return;
        };
        if let Some(file) = tracked.iter().find(|file| pattern.matches(file)) {
            debug!(pattern = raw, file = %file, "Tracked file matches default pattern, not recording");
            return;
        }

        if let Err(e) = self
            .store
            .append(Scope::Project, PolicyKind::Ignore, root, raw)
        {
            warn!(root = %root.display(), pattern = raw, "Failed to record default pattern: {e}");
        }
    }
}

/// Canonicalizes a path that may no longer exist by canonicalizing its parent.
fn canonicalize_lenient(path: &Path) -> Option<std::path::PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Some(canonical);
    }
    let parent = path.parent()?.canonicalize().ok()?;
    Some(parent.join(path.file_name()?))
}
