//! Filesystem notification source feeding the dispatcher.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::dispatch::{ChangeEvent, ChangeKind, DispatcherHandle};

/// Recursive watcher over every monitored repository root.
///
/// Notifications are translated on the watcher's own thread and handed to
/// the dispatcher with [`DispatcherHandle::submit_blocking`], so a full
/// intake queue drops events after the enqueue timeout instead of stalling
/// the watcher. Dropping the value stops watching.
pub struct RepositoryWatcher {
    _watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl RepositoryWatcher {
    /// Starts watching `roots`.
    pub fn start(roots: Vec<PathBuf>, dispatcher: DispatcherHandle) -> Result<Self> {
        let routing = roots.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for change in changes_for(&event, &routing) {
                        dispatcher.submit_blocking(change);
                    }
                }
                Err(e) => warn!(error = %e, "File watcher error"),
            }
        })
        .context("Failed to create file watcher")?;

        for root in &roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch {}", root.display()))?;
            info!(root = %root.display(), "Watching repository");
        }

        Ok(Self {
            _watcher: watcher,
            roots,
        })
    }

    /// Roots being watched.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Translates one notification into change events.
///
/// A rename becomes a deletion of the old path and a creation of the new
/// one. Directory events, access events and anything under a `.git`
/// directory produce nothing.
pub fn changes_for(event: &Event, roots: &[PathBuf]) -> Vec<ChangeEvent> {
    let kinds: Vec<(ChangeKind, &PathBuf)> = match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
            Vec::new()
        }
        EventKind::Create(_) => tagged(ChangeKind::Created, &event.paths),
        EventKind::Remove(_) => tagged(ChangeKind::Deleted, &event.paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut kinds = Vec::new();
            if let [from, to, ..] = event.paths.as_slice() {
                kinds.push((ChangeKind::Deleted, from));
                kinds.push((ChangeKind::Created, to));
            }
            kinds
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            tagged(ChangeKind::Deleted, &event.paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            tagged(ChangeKind::Created, &event.paths)
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                let kind = if path.exists() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                };
                (kind, path)
            })
            .collect(),
        EventKind::Modify(_) => tagged(ChangeKind::Modified, &event.paths),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    };

    kinds
        .into_iter()
        .filter(|(kind, path)| *kind == ChangeKind::Deleted || !path.is_dir())
        .filter_map(|(kind, path)| {
            let Some(root) = owning_root(path, roots) else {
                debug!(path = %path.display(), "Change outside monitored roots");
                return None;
            };
            if is_under_git_dir(path, root) {
                return None;
            }
            Some(ChangeEvent::new(root, path.clone(), kind))
        })
        .collect()
}

fn tagged(kind: ChangeKind, paths: &[PathBuf]) -> Vec<(ChangeKind, &PathBuf)> {
    paths.iter().map(|path| (kind, path)).collect()
}

/// The most specific monitored root containing `path`.
fn owning_root<'a>(path: &Path, roots: &'a [PathBuf]) -> Option<&'a PathBuf> {
    roots
        .iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count())
}

fn is_under_git_dir(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root)
        .ok()
        .and_then(|relative| relative.components().next())
        .is_some_and(|first| first.as_os_str() == ".git")
}
