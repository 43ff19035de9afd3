//! Review items, decisions and their JSON-backed store.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{ReviewError, Result};
use crate::dispatch::ChangeKind;
use crate::policy::{ClassificationEngine, PolicyKind, Resolution, Scope, Verdict};
use crate::utils::atomic::{atomic_write_json, read_json_optional};
use crate::utils::lock::FileLock;

/// Whether an item still needs a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Waiting for a decision.
    Pending,
    /// A decision was applied. Terminal.
    Resolved,
}

/// What a reviewer chose for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    /// Always commit the path.
    Include,
    /// Never commit the path.
    Ignore,
    /// Close the item without recording a pattern.
    NoAction,
}

impl ReviewAction {
    fn policy_kind(self) -> Option<PolicyKind> {
        match self {
            Self::Include => Some(PolicyKind::Include),
            Self::Ignore => Some(PolicyKind::Ignore),
            Self::NoAction => None,
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Include => write!(f, "include"),
            Self::Ignore => write!(f, "ignore"),
            Self::NoAction => write!(f, "no_action"),
        }
    }
}

/// A reviewer's decision for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    /// Item the decision applies to.
    pub item_id: Uuid,
    /// Policy files the pattern is written to.
    pub scope: Scope,
    /// Chosen action.
    pub action: ReviewAction,
}

/// Record of how an item was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDecision {
    /// Scope chosen by the reviewer.
    pub scope: Scope,
    /// Action chosen by the reviewer.
    pub action: ReviewAction,
    /// Pattern appended to a policy file, if any.
    pub pattern: Option<String>,
    /// When the decision was applied.
    pub resolved_at: DateTime<Utc>,
}

/// A path no policy file covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewItem {
    /// Stable identifier.
    pub id: Uuid,
    /// Path relative to the repository root.
    pub path: String,
    /// Repository the path belongs to.
    pub repository_root: PathBuf,
    /// When the path was first queued.
    pub first_seen_at: DateTime<Utc>,
    /// Current status.
    pub status: ReviewStatus,
    /// Change that triggered the item, when known.
    #[serde(default)]
    pub change_kind: Option<ChangeKind>,
    /// Why the item needs review.
    pub reason: String,
    /// Set once the item is resolved.
    #[serde(default)]
    pub decision: Option<AppliedDecision>,
}

impl ReviewItem {
    /// Returns true while the item awaits a decision.
    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::Pending
    }
}

/// Result of [`ReviewQueue::enqueue_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new pending item was stored.
    Created(ReviewItem),
    /// A pending item for the same path already existed and is returned unchanged.
    Existing(ReviewItem),
    /// A policy file now covers the path, so no item is needed.
    Covered(Resolution),
}

impl EnqueueOutcome {
    /// The pending item, unless the path turned out to be covered.
    pub fn item(&self) -> Option<&ReviewItem> {
        match self {
            Self::Created(item) | Self::Existing(item) => Some(item),
            Self::Covered(_) => None,
        }
    }
}

/// Pending and resolved item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Items awaiting a decision.
    pub pending: usize,
    /// Items already resolved.
    pub resolved: usize,
}

impl QueueStats {
    /// Total number of items ever queued.
    pub fn total(&self) -> usize {
        self.pending + self.resolved
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    items: Vec<ReviewItem>,
}

/// Review items persisted as a JSON file.
///
/// Every operation re-reads the file under one lock, so decisions written by
/// another process (the `review decide` command next to a running daemon)
/// are seen immediately. Mutations rewrite the file atomically before the
/// cached copy is updated.
pub struct ReviewQueue {
    path: PathBuf,
    engine: Arc<ClassificationEngine>,
    items: Mutex<Vec<ReviewItem>>,
}

impl ReviewQueue {
    /// Opens the queue stored at `path`, starting empty if the file is missing.
    pub fn open(path: impl Into<PathBuf>, engine: Arc<ClassificationEngine>) -> Result<Self> {
        let path = path.into();
        let items = read_items(&path)?;

        debug!(path = %path.display(), items = items.len(), "Opened review queue");
        Ok(Self {
            path,
            engine,
            items: Mutex::new(items),
        })
    }

    /// File the queue is persisted to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues a path unless a pending item exists or a policy file covers it.
    ///
    /// The path is re-classified first, so a decision recorded since the
    /// event was observed short-circuits here.
    pub fn enqueue_if_absent(
        &self,
        path: &Path,
        repository_root: &Path,
        change_kind: Option<ChangeKind>,
    ) -> Result<EnqueueOutcome> {
        let _file_lock = self.file_lock()?;
        let resolution = self.engine.resolve(path, repository_root)?;
        if resolution.verdict != Verdict::Ambiguous {
            debug!(path = %path.display(), verdict = %resolution.verdict, "Path covered, not queuing");
            return Ok(EnqueueOutcome::Covered(resolution));
        }
        let relative = self.engine.relative_path(path, repository_root)?;

        let mut items = self.lock();
        if let Some(existing) = items
            .iter()
            .find(|i| i.is_pending() && i.path == relative && i.repository_root == repository_root)
        {
            return Ok(EnqueueOutcome::Existing(existing.clone()));
        }

        let item = ReviewItem {
            id: Uuid::new_v4(),
            path: relative,
            repository_root: repository_root.to_path_buf(),
            first_seen_at: Utc::now(),
            status: ReviewStatus::Pending,
            change_kind,
            reason: "No include or ignore pattern matches this path".to_string(),
            decision: None,
        };

        let mut updated = items.clone();
        updated.push(item.clone());
        self.persist(&updated)?;
        *items = updated;

        info!(
            id = %item.id,
            root = %item.repository_root.display(),
            path = %item.path,
            "Queued path for review"
        );
        Ok(EnqueueOutcome::Created(item))
    }

    /// Pending items, oldest first, optionally limited to one repository.
    pub fn list_pending(&self, repository_root: Option<&Path>) -> Vec<ReviewItem> {
        let mut pending: Vec<ReviewItem> = self
            .lock()
            .iter()
            .filter(|i| i.is_pending())
            .filter(|i| repository_root.map_or(true, |root| i.repository_root == root))
            .cloned()
            .collect();
        pending.sort_by_key(|i| i.first_seen_at);
        pending
    }

    /// Paths of every item, pending or resolved, recorded for one repository.
    pub fn known_paths(&self, repository_root: &Path) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|i| i.repository_root == repository_root)
            .map(|i| i.path.clone())
            .collect()
    }

    /// Looks up an item by id.
    pub fn get(&self, id: Uuid) -> Option<ReviewItem> {
        self.lock().iter().find(|i| i.id == id).cloned()
    }

    /// Applies a decision and returns the resolved item.
    ///
    /// Writes the item's path as a pattern to the chosen policy file (nothing
    /// for [`ReviewAction::NoAction`]) and marks the item resolved. A second
    /// decision for the same item fails with [`ReviewError::AlreadyResolved`]
    /// and changes nothing.
    pub fn apply_decision(&self, decision: ReviewDecision) -> Result<ReviewItem> {
        let _file_lock = self.file_lock()?;
        let mut items = self.lock();
        let index = items
            .iter()
            .position(|i| i.id == decision.item_id)
            .ok_or(ReviewError::NotFound(decision.item_id))?;

        if !items[index].is_pending() {
            return Err(ReviewError::AlreadyResolved(decision.item_id));
        }

        let pattern = match decision.action.policy_kind() {
            Some(kind) => {
                let pattern = decision_pattern(&items[index].path);
                self.engine.store().append(
                    decision.scope,
                    kind,
                    &items[index].repository_root,
                    &pattern,
                )?;
                Some(pattern)
            }
            None => None,
        };

        let mut updated = items.clone();
        let item = &mut updated[index];
        item.status = ReviewStatus::Resolved;
        item.decision = Some(AppliedDecision {
            scope: decision.scope,
            action: decision.action,
            pattern,
            resolved_at: Utc::now(),
        });
        let resolved = item.clone();

        self.persist(&updated)?;
        *items = updated;

        info!(
            id = %resolved.id,
            path = %resolved.path,
            action = %decision.action,
            scope = %decision.scope,
            "Applied review decision"
        );
        Ok(resolved)
    }

    /// Pending and resolved counts.
    pub fn stats(&self) -> QueueStats {
        self.lock()
            .iter()
            .fold(QueueStats::default(), |mut stats, item| {
                match item.status {
                    ReviewStatus::Pending => stats.pending += 1,
                    ReviewStatus::Resolved => stats.resolved += 1,
                }
                stats
            })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ReviewItem>> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        match read_items(&self.path) {
            Ok(current) => *items = current,
            Err(e) => warn!(error = %e, "Using cached review items"),
        }
        items
    }

    /// Serializes read-modify-write cycles with other processes.
    fn file_lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.path).map_err(|source| ReviewError::Storage {
            path: self.path.clone(),
            source,
        })
    }

    fn persist(&self, items: &[ReviewItem]) -> Result<()> {
        #[derive(Serialize)]
        struct QueueFileRef<'a> {
            items: &'a [ReviewItem],
        }

        atomic_write_json(&self.path, &QueueFileRef { items }).map_err(|source| {
            ReviewError::Storage {
                path: self.path.clone(),
                source,
            }
        })
    }
}

fn read_items(path: &Path) -> Result<Vec<ReviewItem>> {
    let file: QueueFile = read_json_optional(path)
        .map_err(|source| ReviewError::Storage {
            path: path.to_path_buf(),
            source,
        })?
        .unwrap_or_default();
    Ok(file.items)
}

/// Pattern recorded for a reviewed path.
///
/// Anchored at the root and with glob metacharacters escaped, so it covers
/// exactly that path. The leading `/` also keeps names starting with `#` or
/// `!` from being read back as comments or negations.
fn decision_pattern(path: &str) -> String {
    format!("/{}", globset::escape(&path.replace('\\', "\\\\")))
}
