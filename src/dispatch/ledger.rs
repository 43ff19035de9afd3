//! Persistent record of failed events and halted repositories.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::event::{ChangeEvent, ErrorKind};
use crate::utils::atomic::{atomic_write_json, read_json_optional};
use crate::utils::lock::FileLock;

/// An event that ended in the `failed` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEvent {
    /// The event as it was submitted.
    pub event: ChangeEvent,
    /// Failure classification.
    pub error_kind: ErrorKind,
    /// Human-readable cause.
    pub detail: String,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
}

/// A repository whose processing stopped until someone resumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltedRepository {
    /// Repository root.
    pub root: PathBuf,
    /// Why processing stopped.
    pub reason: String,
    /// Uncommitted paths that caused the halt.
    #[serde(default)]
    pub unexpected_changes: Vec<String>,
    /// When processing stopped.
    pub halted_at: DateTime<Utc>,
}

/// What [`FailureLedger::resume`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resumed {
    /// The repository had been halted.
    pub was_halted: bool,
    /// Failed events moved to the replay list.
    pub requeued: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    failed: Vec<FailedEvent>,
    #[serde(default)]
    halted: Vec<HaltedRepository>,
    #[serde(default)]
    replay: Vec<ChangeEvent>,
}

/// JSON-backed ledger of failures.
///
/// Every read goes to disk, so a ledger edited by another process (such as
/// the `resume` command) is seen on the next call. Writes within a process
/// are serialized and replace the file atomically.
#[derive(Debug)]
pub struct FailureLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FailureLedger {
    /// Opens the ledger stored at `path`; a missing file is an empty ledger.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// File the ledger is persisted to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records events as failed.
    pub fn record_failures(
        &self,
        events: &[ChangeEvent],
        error_kind: ErrorKind,
        detail: &str,
    ) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let failed_at = Utc::now();
        self.update(|ledger| {
            for event in events {
                warn!(
                    event = %event.id,
                    root = %event.repository_root.display(),
                    path = %event.path.display(),
                    error_kind = %error_kind,
                    state = "failed",
                    "{detail}"
                );
                ledger.failed.push(FailedEvent {
                    event: event.clone(),
                    error_kind,
                    detail: detail.to_string(),
                    failed_at,
                });
            }
        })
    }

    /// Marks a repository halted. A repository already halted keeps its first record.
    pub fn halt(&self, root: &Path, reason: &str, unexpected_changes: Vec<String>) -> Result<()> {
        self.update(|ledger| {
            if ledger.halted.iter().any(|h| h.root == root) {
                return;
            }
            warn!(root = %root.display(), unexpected = ?unexpected_changes, "Halting repository: {reason}");
            ledger.halted.push(HaltedRepository {
                root: root.to_path_buf(),
                reason: reason.to_string(),
                unexpected_changes,
                halted_at: Utc::now(),
            });
        })
    }

    /// Clears a halt and moves the repository's failed events to the replay
    /// list, where the next processing cycle for that repository picks them up.
    pub fn resume(&self, root: &Path) -> Result<Resumed> {
        let mut resumed = Resumed::default();
        self.update(|ledger| {
            let before = ledger.halted.len();
            ledger.halted.retain(|h| h.root != root);
            resumed.was_halted = ledger.halted.len() != before;

            let (mine, rest): (Vec<_>, Vec<_>) = ledger
                .failed
                .drain(..)
                .partition(|f| f.event.repository_root == root);
            ledger.failed = rest;
            resumed.requeued = mine.len();
            ledger.replay.extend(mine.into_iter().map(|f| f.event));
        })?;
        info!(
            root = %root.display(),
            was_halted = resumed.was_halted,
            requeued = resumed.requeued,
            "Resumed repository"
        );
        Ok(resumed)
    }

    /// Removes and returns the events queued for replay in one repository, oldest first.
    pub fn take_replays(&self, root: &Path) -> Result<Vec<ChangeEvent>> {
        if !self.load()?.replay.iter().any(|e| e.repository_root == root) {
            return Ok(Vec::new());
        }
        let mut taken = Vec::new();
        self.update(|ledger| {
            let (mine, rest): (Vec<_>, Vec<_>) = ledger
                .replay
                .drain(..)
                .partition(|e| e.repository_root == root);
            ledger.replay = rest;
            taken = mine;
        })?;
        taken.sort_by_key(|e| e.timestamp);
        Ok(taken)
    }

    /// Returns true if the repository is halted.
    pub fn is_halted(&self, root: &Path) -> Result<bool> {
        Ok(self.load()?.halted.iter().any(|h| h.root == root))
    }

    /// All failed events, oldest first.
    pub fn failed_events(&self) -> Result<Vec<FailedEvent>> {
        Ok(self.load()?.failed)
    }

    /// All halted repositories.
    pub fn halted_repositories(&self) -> Result<Vec<HaltedRepository>> {
        Ok(self.load()?.halted)
    }

    /// Events waiting to be replayed.
    pub fn replay_events(&self) -> Result<Vec<ChangeEvent>> {
        Ok(self.load()?.replay)
    }

    /// Paths of one repository's failed or replay-pending events.
    pub fn outstanding_paths(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let ledger = self.load()?;
        Ok(ledger
            .failed
            .into_iter()
            .map(|f| f.event)
            .chain(ledger.replay)
            .filter(|e| e.repository_root == root)
            .map(|e| e.path)
            .collect())
    }

    fn load(&self) -> Result<LedgerFile> {
        Ok(read_json_optional(&self.path)
            .with_context(|| format!("Failed to read failure ledger {}", self.path.display()))?
            .unwrap_or_default())
    }

    fn update(&self, apply: impl FnOnce(&mut LedgerFile)) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _file_lock = FileLock::acquire(&self.path)
            .with_context(|| format!("Failed to lock failure ledger {}", self.path.display()))?;
        let mut ledger = self.load()?;
        apply(&mut ledger);
        atomic_write_json(&self.path, &ledger)
            .with_context(|| format!("Failed to write failure ledger {}", self.path.display()))
    }
}
