//! Worker pool turning change events into commits.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::event::{ChangeEvent, CommitOutcome, ErrorKind, EventState};
use super::guard::{Admission, GuardTable};
use super::ledger::FailureLedger;
use crate::git::{RepositoryGateway, WorkingDirectoryStatus};
use crate::message::{GenerationError, MessageGenerator};
use crate::policy::store::{PROJECT_IGNORE_FILE, PROJECT_INCLUDE_FILE};
use crate::policy::{is_repository_internal, ClassificationEngine, Verdict};
use crate::review::{EnqueueOutcome, ReviewError, ReviewQueue};
use crate::utils::shutdown::{cancelled, is_cancelled};

/// Tuning knobs for the worker pool.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of workers.
    pub workers: usize,
    /// Capacity of the intake queue.
    pub queue_capacity: usize,
    /// How long a producer may wait for intake capacity before the event is dropped.
    pub enqueue_timeout: Duration,
    /// Quiet period before a repository's buffered events are taken as one batch.
    pub debounce: Duration,
    /// Upper bound on one stage/message/commit cycle.
    pub max_event_time: Duration,
    /// Wait before re-checking a working tree that looks dirty, so that
    /// notifications still in flight can reach the guard table.
    pub settle: Duration,
    /// Style guide passed to the message generator.
    pub style_guide: String,
    /// Capacity of the outcome channel; outcomes beyond it are dropped.
    pub outcome_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            enqueue_timeout: Duration::from_millis(500),
            debounce: Duration::from_millis(750),
            max_event_time: Duration::from_secs(90 * 60),
            settle: Duration::from_secs(1),
            style_guide: String::new(),
            outcome_capacity: 256,
        }
    }
}

/// Collaborators the dispatcher drives.
#[derive(Clone)]
pub struct DispatcherParts {
    /// Version-control operations.
    pub gateway: Arc<dyn RepositoryGateway>,
    /// Path classification.
    pub engine: Arc<ClassificationEngine>,
    /// Destination for ambiguous paths.
    pub review: Arc<ReviewQueue>,
    /// Commit message source.
    pub generator: Arc<MessageGenerator>,
    /// Record of failures and halted repositories.
    pub ledger: Arc<FailureLedger>,
}

/// Cloneable producer side of the intake queue.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: flume::Sender<ChangeEvent>,
    enqueue_timeout: Duration,
}

impl DispatcherHandle {
    pub(crate) fn from_sender(sender: flume::Sender<ChangeEvent>, enqueue_timeout: Duration) -> Self {
        Self {
            sender,
            enqueue_timeout,
        }
    }

    /// Queues an event, waiting at most the enqueue timeout for capacity.
    ///
    /// Returns false if the event was dropped.
    pub async fn submit(&self, event: ChangeEvent) -> bool {
        let id = event.id;
        match tokio::time::timeout(self.enqueue_timeout, self.sender.send_async(event)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                warn!(event = %id, "Dispatcher stopped, dropping event");
                false
            }
            Err(_) => {
                warn!(event = %id, "Intake queue full, dropping event");
                false
            }
        }
    }

    /// Blocking variant of [`submit`](Self::submit) for producers outside the runtime.
    pub fn submit_blocking(&self, event: ChangeEvent) -> bool {
        let id = event.id;
        match self.sender.send_timeout(event, self.enqueue_timeout) {
            Ok(()) => true,
            Err(flume::SendTimeoutError::Timeout(_)) => {
                warn!(event = %id, "Intake queue full, dropping event");
                false
            }
            Err(flume::SendTimeoutError::Disconnected(_)) => {
                warn!(event = %id, "Dispatcher stopped, dropping event");
                false
            }
        }
    }
}

/// Owns the router and worker tasks.
///
/// A single router moves events from the intake queue into the guard table
/// in arrival order. A repository root is handed to a worker only while its
/// guard is free, so events of one repository are processed in order and
/// never by two workers at once, while other repositories proceed in
/// parallel.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    handle: DispatcherHandle,
    intake: flume::Receiver<ChangeEvent>,
    outcomes: flume::Receiver<CommitOutcome>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawns the router and workers on the current tokio runtime.
    pub fn start(parts: DispatcherParts, config: DispatcherConfig) -> Self {
        let (sender, intake) = flume::bounded(config.queue_capacity.max(1));
        let (outcome_tx, outcomes) = flume::bounded(config.outcome_capacity.max(1));
        let (work_tx, work_rx) = flume::unbounded();
        let (stop, stop_rx) = watch::channel(false);

        let handle = DispatcherHandle::from_sender(sender, config.enqueue_timeout);
        let workers = config.workers.max(1);
        let pipeline = Arc::new(Pipeline {
            parts,
            config,
            guards: GuardTable::new(),
            outcomes: outcome_tx,
        });

        let mut tasks = Vec::with_capacity(workers + 1);
        tasks.push(tokio::spawn(route(
            pipeline.clone(),
            intake.clone(),
            work_tx.clone(),
            stop_rx.clone(),
        )));
        for worker in 0..workers {
            tasks.push(tokio::spawn(work(
                worker,
                pipeline.clone(),
                work_rx.clone(),
                work_tx.clone(),
                stop_rx.clone(),
            )));
        }
        info!(workers, "Dispatcher started");

        Self {
            pipeline,
            handle,
            intake,
            outcomes,
            stop,
            tasks,
        }
    }

    /// Producer handle for notification sources.
    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Receiver of one [`CommitOutcome`] per processed batch.
    pub fn outcomes(&self) -> flume::Receiver<CommitOutcome> {
        self.outcomes.clone()
    }

    /// Queues an event; see [`DispatcherHandle::submit`].
    pub async fn submit(&self, event: ChangeEvent) -> bool {
        self.handle.submit(event).await
    }

    /// Clears a halt and replays the repository's failed events.
    ///
    /// Returns the number of events resubmitted.
    pub async fn resume(&self, root: &Path) -> Result<usize> {
        let ledger = &self.pipeline.parts.ledger;
        ledger.resume(root)?;
        let replays = ledger.take_replays(root)?;
        let mut submitted = 0;
        for event in replays {
            let retained = event.clone();
            if self.handle.submit(event).await {
                submitted += 1;
            } else {
                self.pipeline.fail(
                    &[retained],
                    ErrorKind::Shutdown,
                    "Replay could not be queued",
                );
            }
        }
        Ok(submitted)
    }

    /// Stops the pool.
    ///
    /// Raises the stop signal, waits for every task to reach an event
    /// boundary, then records every event that never started as failed with
    /// [`ErrorKind::Shutdown`]. A commit in progress is never interrupted.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Dispatcher task ended abnormally");
            }
        }

        let mut leftover = self.pipeline.guards.drain_all();
        leftover.extend(self.intake.drain());
        if !leftover.is_empty() {
            warn!(events = leftover.len(), "Recording unprocessed events");
        }
        self.pipeline.fail(
            &leftover,
            ErrorKind::Shutdown,
            "Dispatcher stopped before the event was processed",
        );
        info!("Dispatcher stopped");
    }
}

async fn route(
    pipeline: Arc<Pipeline>,
    intake: flume::Receiver<ChangeEvent>,
    work: flume::Sender<PathBuf>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancelled(&mut stop) => break,
            received = intake.recv_async() => match received {
                Ok(event) => event,
                Err(_) => break,
            },
        };
        pipeline.admit(event, &work);
    }
    debug!("Router stopped");
}

async fn work(
    worker: usize,
    pipeline: Arc<Pipeline>,
    roots: flume::Receiver<PathBuf>,
    reschedule: flume::Sender<PathBuf>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let root = tokio::select! {
            biased;
            () = cancelled(&mut stop) => break,
            received = roots.recv_async() => match received {
                Ok(root) => root,
                Err(_) => break,
            },
        };

        if !pipeline.config.debounce.is_zero() {
            tokio::select! {
                biased;
                () = cancelled(&mut stop) => break,
                () = tokio::time::sleep(pipeline.config.debounce) => {}
            }
        }
        if is_cancelled(&stop) {
            break;
        }

        let batch = pipeline.guards.take_batch(&root);
        if !batch.is_empty() {
            debug!(worker, root = %root.display(), events = batch.len(), "Processing batch");
            let outcome = pipeline.process(&root, batch, stop.clone()).await;
            pipeline.publish(outcome);
        }

        if pipeline.guards.finish(&root) {
            let _ = reschedule.send(root);
        }
    }
    debug!(worker, "Worker stopped");
}

/// Shared state of the router and the workers.
struct Pipeline {
    parts: DispatcherParts,
    config: DispatcherConfig,
    guards: GuardTable,
    outcomes: flume::Sender<CommitOutcome>,
}

/// An event that classified as include, with its root-relative path.
struct Included {
    event: ChangeEvent,
    relative: String,
}

struct CycleFailure {
    kind: ErrorKind,
    detail: String,
}

impl CycleFailure {
    fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<GenerationError> for CycleFailure {
    fn from(e: GenerationError) -> Self {
        let kind = match &e {
            GenerationError::Cancelled => ErrorKind::Cancelled,
            GenerationError::Exhausted { .. } => ErrorKind::Generation,
            GenerationError::EscalationFailed(_) | GenerationError::EscalationTimedOut { .. } => {
                ErrorKind::Escalation
            }
        };
        Self::new(kind, e.to_string())
    }
}

enum Cycle {
    Committed { message: String, commit_id: String },
    Unchanged,
}

impl Pipeline {
    fn admit(&self, event: ChangeEvent, work: &flume::Sender<PathBuf>) {
        let root = event.repository_root.clone();
        match self.parts.engine.relative_path(&event.path, &root) {
            Ok(relative) if is_repository_internal(&relative) => {
                debug!(path = %relative, "Skipping repository-internal path");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                self.fail(&[event], ErrorKind::Configuration, &e.to_string());
                return;
            }
        }

        if self.is_halted(&root) {
            self.fail(
                &[event],
                ErrorKind::RepositoryHalted,
                "Repository is halted until it is resumed",
            );
            return;
        }

        transition(&event, EventState::Queued);
        if let Admission::Scheduled(root) = self.guards.push(event) {
            let _ = work.send(root);
        }
    }

    async fn process(
        &self,
        root: &Path,
        mut batch: Vec<ChangeEvent>,
        stop: watch::Receiver<bool>,
    ) -> CommitOutcome {
        if self.is_halted(root) {
            self.fail(
                &batch,
                ErrorKind::RepositoryHalted,
                "Repository is halted until it is resumed",
            );
            return outcome(root, &batch, None, Some(ErrorKind::RepositoryHalted));
        }

        match self.parts.ledger.take_replays(root) {
            Ok(replays) if !replays.is_empty() => {
                info!(root = %root.display(), events = replays.len(), "Replaying failed events");
                batch.splice(0..0, replays);
            }
            Ok(_) => {}
            Err(e) => warn!(root = %root.display(), error = %e, "Failed to read replay list"),
        }

        if let Err(failure) = self.ensure_repository(root) {
            self.fail(&batch, failure.kind, &failure.detail);
            return outcome(root, &batch, None, Some(failure.kind));
        }

        let included = match self.classify_batch(root, &batch) {
            Ok(included) => included,
            Err(failure) => return outcome(root, &batch, None, Some(failure.kind)),
        };
        if included.is_empty() {
            return outcome(root, &batch, None, None);
        }

        let mut paths: Vec<String> = Vec::new();
        for item in &included {
            if !paths.contains(&item.relative) {
                paths.push(item.relative.clone());
            }
        }
        let events: Vec<ChangeEvent> = included.into_iter().map(|i| i.event).collect();

        let cycle = tokio::time::timeout(
            self.config.max_event_time,
            self.commit_cycle(root, &events, &paths, stop),
        )
        .await
        .unwrap_or_else(|_| {
            Err(CycleFailure::new(
                ErrorKind::TimedOut,
                format!(
                    "Processing exceeded {}s",
                    self.config.max_event_time.as_secs()
                ),
            ))
        });

        match cycle {
            Ok(Cycle::Committed { message, commit_id }) => {
                for event in &events {
                    transition(event, EventState::Committed);
                }
                info!(root = %root.display(), commit = %commit_id, files = paths.len(), "Committed changes");
                let mut result = outcome(root, &batch, Some(message), None);
                result.commit_id = Some(commit_id);
                result.success = true;
                result
            }
            Ok(Cycle::Unchanged) => {
                for event in &events {
                    transition(event, EventState::Committed);
                }
                info!(root = %root.display(), "Staged changes already match HEAD, nothing to commit");
                outcome(root, &batch, None, None)
            }
            Err(failure) => {
                if failure.kind != ErrorKind::DirtyWorkingTree {
                    self.unstage(root, &paths);
                }
                self.fail(&events, failure.kind, &failure.detail);
                outcome(root, &batch, None, Some(failure.kind))
            }
        }
    }

    fn ensure_repository(&self, root: &Path) -> std::result::Result<(), CycleFailure> {
        if self.parts.gateway.is_repository(root) {
            return Ok(());
        }
        info!(root = %root.display(), "Initializing repository");
        self.gateway_call(root, "init", || self.parts.gateway.init(root))
    }

    /// Classifies every event; a policy load failure fails the whole batch.
    fn classify_batch(
        &self,
        root: &Path,
        batch: &[ChangeEvent],
    ) -> std::result::Result<Vec<Included>, CycleFailure> {
        let mut included = Vec::new();

        for (index, event) in batch.iter().enumerate() {
            transition(event, EventState::Classifying);
            let verdict = self
                .parts
                .engine
                .classify(&event.path, root)
                .map_err(ReviewError::from)
                .and_then(|resolution| match resolution.verdict {
                    Verdict::Ambiguous => self
                        .parts
                        .review
                        .enqueue_if_absent(&event.path, root, Some(event.kind))
                        .map(|outcome| match outcome {
                            EnqueueOutcome::Covered(resolution) => resolution.verdict,
                            EnqueueOutcome::Created(_) | EnqueueOutcome::Existing(_) => {
                                Verdict::Ambiguous
                            }
                        }),
                    verdict => Ok(verdict),
                });

            match verdict {
                Ok(Verdict::Include) => {
                    let relative = self
                        .parts
                        .engine
                        .relative_path(&event.path, root)
                        .map_err(ReviewError::from);
                    match relative {
                        Ok(relative) => included.push(Included {
                            event: event.clone(),
                            relative,
                        }),
                        Err(e) => {
                            return Err(self.fail_remaining(included, &batch[index..], &e));
                        }
                    }
                }
                Ok(Verdict::Ignore) => transition(event, EventState::Ignored),
                Ok(Verdict::Ambiguous) => transition(event, EventState::AwaitingReview),
                Err(e) => return Err(self.fail_remaining(included, &batch[index..], &e)),
            }
        }

        Ok(included)
    }

    fn fail_remaining(
        &self,
        included: Vec<Included>,
        remaining: &[ChangeEvent],
        cause: &ReviewError,
    ) -> CycleFailure {
        let failed: Vec<ChangeEvent> = included
            .into_iter()
            .map(|i| i.event)
            .chain(remaining.iter().cloned())
            .collect();
        let failure = CycleFailure::new(ErrorKind::Configuration, cause.to_string());
        self.fail(&failed, failure.kind, &failure.detail);
        failure
    }

    async fn commit_cycle(
        &self,
        root: &Path,
        events: &[ChangeEvent],
        paths: &[String],
        stop: watch::Receiver<bool>,
    ) -> std::result::Result<Cycle, CycleFailure> {
        let gateway = &self.parts.gateway;

        let mut status = self.gateway_call(root, "status", || gateway.status(root))?;
        if !self.unexpected_changes(root, &status, paths).is_empty() {
            debug!(root = %root.display(), "Working tree has unexplained changes, waiting for notifications to settle");
            let mut settle_stop = stop.clone();
            tokio::select! {
                biased;
                () = cancelled(&mut settle_stop) => {
                    return Err(CycleFailure::new(ErrorKind::Cancelled, "Stopped while checking the working tree"));
                }
                () = tokio::time::sleep(self.config.settle) => {}
            }
            status = self.gateway_call(root, "status", || gateway.status(root))?;
            let unexpected = self.unexpected_changes(root, &status, paths);
            if !unexpected.is_empty() {
                return Err(self.halt_dirty(root, unexpected));
            }
        }

        let mut paths = paths.to_vec();
        for policy_file in self.policy_updates(root, &status) {
            if !paths.contains(&policy_file) {
                debug!(root = %root.display(), path = %policy_file, "Committing updated policy file");
                paths.push(policy_file);
            }
        }
        let paths = paths.as_slice();

        for event in events {
            transition(event, EventState::Staging);
        }
        self.gateway_call(root, "stage", || gateway.stage(root, paths))?;
        let diff = self.gateway_call(root, "diff", || gateway.diff(root))?;
        if diff.trim().is_empty() {
            return Ok(Cycle::Unchanged);
        }

        for event in events {
            transition(event, EventState::MessagePending);
        }
        let message = self
            .parts
            .generator
            .generate(&diff, &self.config.style_guide, paths, stop)
            .await?;
        debug!(root = %root.display(), source = ?message.source, "Commit message ready");

        for event in events {
            transition(event, EventState::Committing);
        }
        let commit_id =
            self.gateway_call(root, "commit", || gateway.commit(root, &message.text))?;

        Ok(Cycle::Committed {
            message: message.text,
            commit_id,
        })
    }

    /// Changed project policy files that are themselves included.
    ///
    /// Classification and review decisions append to these files, so they are
    /// committed with the batch that caused the change.
    fn policy_updates(&self, root: &Path, status: &WorkingDirectoryStatus) -> Vec<String> {
        status
            .changes
            .iter()
            .map(|change| change.file.as_str())
            .filter(|file| is_project_policy_file(file))
            .filter(|file| {
                self.parts
                    .engine
                    .resolve(Path::new(file), root)
                    .is_ok_and(|resolution| resolution.verdict == Verdict::Include)
            })
            .map(str::to_string)
            .collect()
    }

    /// Uncommitted paths that nothing the pipeline knows about accounts for.
    ///
    /// A path is expected when it is part of this batch, buffered behind the
    /// guard, recorded in the failure ledger, known to the review queue, or a
    /// project policy file. Paths that are not classified as include never
    /// count.
    fn unexpected_changes(
        &self,
        root: &Path,
        status: &WorkingDirectoryStatus,
        paths: &[String],
    ) -> Vec<String> {
        if status.clean {
            return Vec::new();
        }

        let engine = &self.parts.engine;
        let mut expected: HashSet<String> = paths.iter().cloned().collect();
        let outstanding = self
            .parts
            .ledger
            .outstanding_paths(root)
            .unwrap_or_else(|e| {
                warn!(root = %root.display(), error = %e, "Failed to read failure ledger");
                Vec::new()
            });
        expected.extend(
            outstanding
                .into_iter()
                .chain(self.guards.pending_paths(root))
                .filter_map(|p| engine.relative_path(&p, root).ok()),
        );
        expected.extend(self.parts.review.known_paths(root));

        status
            .changes
            .iter()
            .map(|change| change.file.trim_end_matches('/').to_string())
            .filter(|file| {
                !expected.contains(file)
                    && !is_repository_internal(file)
                    && !is_project_policy_file(file)
            })
            .filter(|file| {
                engine
                    .resolve(Path::new(file), root)
                    .map_or(true, |resolution| resolution.verdict == Verdict::Include)
            })
            .collect()
    }

    fn halt_dirty(&self, root: &Path, unexpected: Vec<String>) -> CycleFailure {
        let detail = format!(
            "Working tree has uncommitted changes not made through the watcher: {}",
            unexpected.join(", ")
        );
        if let Err(e) = self.parts.ledger.halt(root, &detail, unexpected) {
            error!(root = %root.display(), error = %e, "Failed to record halted repository");
        }

        let pending = self.guards.take_batch(root);
        self.fail(
            &pending,
            ErrorKind::RepositoryHalted,
            "Repository is halted until it is resumed",
        );
        CycleFailure::new(ErrorKind::DirtyWorkingTree, detail)
    }

    /// Runs a gateway call, retrying once on failure.
    fn gateway_call<T>(
        &self,
        root: &Path,
        operation: &'static str,
        call: impl Fn() -> Result<T>,
    ) -> std::result::Result<T, CycleFailure> {
        call().or_else(|first| {
            let first = format!("{first:#}");
            warn!(root = %root.display(), operation, error = %first, "Repository operation failed, retrying once");
            call().map_err(|e| {
                CycleFailure::new(ErrorKind::Gateway, format!("{operation} failed: {e:#}"))
            })
        })
    }

    fn unstage(&self, root: &Path, paths: &[String]) {
        if let Err(e) = self.parts.gateway.unstage(root, paths) {
            let e = format!("{e:#}");
            warn!(root = %root.display(), error = %e, "Failed to unstage paths after failure");
        }
    }

    fn is_halted(&self, root: &Path) -> bool {
        self.parts.ledger.is_halted(root).unwrap_or_else(|e| {
            warn!(root = %root.display(), error = %e, "Failed to read failure ledger");
            false
        })
    }

    fn fail(&self, events: &[ChangeEvent], kind: ErrorKind, detail: &str) {
        if let Err(e) = self.parts.ledger.record_failures(events, kind, detail) {
            error!(events = events.len(), error = %e, "Failed to record failed events");
        }
    }

    fn publish(&self, outcome: CommitOutcome) {
        if self.outcomes.try_send(outcome).is_err() {
            debug!("Outcome channel full, dropping outcome");
        }
    }
}

fn is_project_policy_file(relative: &str) -> bool {
    relative == PROJECT_INCLUDE_FILE || relative == PROJECT_IGNORE_FILE
}

fn transition(event: &ChangeEvent, state: EventState) {
    match state {
        EventState::Queued
        | EventState::Ignored
        | EventState::AwaitingReview
        | EventState::Committed => info!(
            event = %event.id,
            root = %event.repository_root.display(),
            path = %event.path.display(),
            state = %state,
            "Event state changed"
        ),
        _ => debug!(
            event = %event.id,
            root = %event.repository_root.display(),
            path = %event.path.display(),
            state = %state,
            "Event state changed"
        ),
    }
}

fn outcome(
    root: &Path,
    batch: &[ChangeEvent],
    message: Option<String>,
    error_kind: Option<ErrorKind>,
) -> CommitOutcome {
    CommitOutcome {
        repository_root: root.to_path_buf(),
        events: batch.iter().map(|e| e.id).collect(),
        message,
        commit_id: None,
        success: false,
        error_kind,
    }
}
