//! Change records and per-event outcomes.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The path appeared.
    Created,
    /// The path's content changed.
    Modified,
    /// The path was removed.
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Modified => write!(f, "modified"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A single observed file change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Identifier used in logs and the failure ledger.
    pub id: Uuid,
    /// Changed path, absolute or relative to `repository_root`.
    pub path: PathBuf,
    /// Kind of change.
    pub kind: ChangeKind,
    /// When the change was observed.
    pub timestamp: DateTime<Utc>,
    /// Root of the working tree the path belongs to.
    pub repository_root: PathBuf,
}

impl ChangeEvent {
    /// Creates an event observed now.
    pub fn new(
        repository_root: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        kind: ChangeKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            kind,
            timestamp: Utc::now(),
            repository_root: repository_root.into(),
        }
    }
}

/// Lifecycle of an event inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Waiting for a worker.
    Queued,
    /// Being matched against the policy files.
    Classifying,
    /// Dropped by an ignore rule.
    Ignored,
    /// Handed to the review queue.
    AwaitingReview,
    /// Being added to the index.
    Staging,
    /// Waiting for a commit message.
    MessagePending,
    /// Being committed.
    Committing,
    /// Part of a commit.
    Committed,
    /// Terminal failure, recorded in the ledger.
    Failed,
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Classifying => "classifying",
            Self::Ignored => "ignored",
            Self::AwaitingReview => "awaiting_review",
            Self::Staging => "staging",
            Self::MessagePending => "message_pending",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why an event failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A policy file could not be read.
    Configuration,
    /// A repository operation failed twice.
    Gateway,
    /// The working tree had unrelated uncommitted changes.
    DirtyWorkingTree,
    /// No commit message could be produced.
    Generation,
    /// The escalation ticket could not be created or polled to completion.
    Escalation,
    /// Processing was cancelled.
    Cancelled,
    /// Processing exceeded the per-event time limit.
    TimedOut,
    /// The event was still queued when the dispatcher shut down.
    Shutdown,
    /// The repository was halted before the event was processed.
    RepositoryHalted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Gateway => "gateway",
            Self::DirtyWorkingTree => "dirty_working_tree",
            Self::Generation => "generation",
            Self::Escalation => "escalation",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Shutdown => "shutdown",
            Self::RepositoryHalted => "repository_halted",
        };
        f.write_str(name)
    }
}

/// Result of one stage/commit cycle, covering every event coalesced into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// Repository the cycle ran against.
    pub repository_root: PathBuf,
    /// Events that contributed to the cycle.
    pub events: Vec<Uuid>,
    /// Commit message, when one was produced.
    pub message: Option<String>,
    /// New commit id on success.
    pub commit_id: Option<String>,
    /// Whether a commit was created.
    pub success: bool,
    /// Failure classification when `success` is false and an error occurred.
    pub error_kind: Option<ErrorKind>,
}
