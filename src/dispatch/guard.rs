//! Per-repository serialization guard and event buffer.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::event::ChangeEvent;

#[derive(Debug, Default)]
struct RepositoryState {
    in_flight: bool,
    pending: VecDeque<ChangeEvent>,
}

/// What happened to an event handed to [`GuardTable::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The repository was idle; the caller now holds its guard and must
    /// schedule the root on a worker.
    Scheduled(PathBuf),
    /// A worker holds the guard; the event waits in the repository's buffer.
    Buffered,
}

/// Guard table keyed by repository root.
///
/// A repository's `in_flight` flag is set when its root is handed to a
/// worker and cleared only when that worker finds the buffer empty, so at
/// most one worker touches a working tree at a time. Buffered events keep
/// submission order.
#[derive(Debug, Default)]
pub struct GuardTable {
    repos: Mutex<HashMap<PathBuf, RepositoryState>>,
}

impl GuardTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers an event behind its repository's guard.
    pub fn push(&self, event: ChangeEvent) -> Admission {
        let mut repos = self.lock();
        let root = event.repository_root.clone();
        let state = repos.entry(root.clone()).or_default();
        state.pending.push_back(event);
        if state.in_flight {
            Admission::Buffered
        } else {
            state.in_flight = true;
            Admission::Scheduled(root)
        }
    }

    /// Takes every buffered event for a repository whose guard the caller holds.
    pub fn take_batch(&self, root: &Path) -> Vec<ChangeEvent> {
        self.lock()
            .get_mut(root)
            .map(|state| state.pending.drain(..).collect())
            .unwrap_or_default()
    }

    /// Ends a processing cycle.
    ///
    /// Returns true if more events arrived meanwhile; the guard stays held
    /// and the caller must schedule the root again. Otherwise the guard is
    /// released.
    pub fn finish(&self, root: &Path) -> bool {
        let mut repos = self.lock();
        let Some(state) = repos.get_mut(root) else {
            return false;
        };
        if state.pending.is_empty() {
            state.in_flight = false;
            false
        } else {
            true
        }
    }

    /// Paths of the events buffered for a repository.
    pub fn pending_paths(&self, root: &Path) -> Vec<PathBuf> {
        self.lock()
            .get(root)
            .map(|state| state.pending.iter().map(|e| e.path.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns true while a worker holds the repository's guard.
    pub fn is_in_flight(&self, root: &Path) -> bool {
        self.lock().get(root).is_some_and(|state| state.in_flight)
    }

    /// Removes every buffered event in every repository.
    pub fn drain_all(&self) -> Vec<ChangeEvent> {
        self.lock()
            .values_mut()
            .flat_map(|state| state.pending.drain(..))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, RepositoryState>> {
        self.repos.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::event::ChangeKind;

    fn event(root: &str, path: &str) -> ChangeEvent {
        ChangeEvent::new(root, path, ChangeKind::Modified)
    }

    #[test]
    fn first_event_schedules_later_ones_buffer() {
        let table = GuardTable::new();
        assert_eq!(
            table.push(event("/r", "a")),
            Admission::Scheduled(PathBuf::from("/r"))
        );
        assert_eq!(table.push(event("/r", "b")), Admission::Buffered);
        assert!(table.is_in_flight(Path::new("/r")));

        assert_eq!(
            table.push(event("/other", "c")),
            Admission::Scheduled(PathBuf::from("/other"))
        );
    }

    #[test]
    fn batches_keep_submission_order() {
        let table = GuardTable::new();
        table.push(event("/r", "a"));
        table.push(event("/r", "b"));
        table.push(event("/r", "c"));
        assert_eq!(table.pending_paths(Path::new("/r")).len(), 3);

        let paths: Vec<PathBuf> = table
            .take_batch(Path::new("/r"))
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]
        );
    }

    #[test]
    fn finish_keeps_guard_while_events_are_pending() {
        let table = GuardTable::new();
        let root = Path::new("/r");
        table.push(event("/r", "a"));
        table.take_batch(root);

        assert_eq!(table.push(event("/r", "b")), Admission::Buffered);
        assert!(table.finish(root));
        assert!(table.is_in_flight(root));

        table.take_batch(root);
        assert!(!table.finish(root));
        assert!(!table.is_in_flight(root));
        assert_eq!(
            table.push(event("/r", "c")),
            Admission::Scheduled(PathBuf::from("/r"))
        );
    }

    #[test]
    fn drain_all_empties_every_buffer() {
        let table = GuardTable::new();
        table.push(event("/a", "1"));
        table.push(event("/a", "2"));
        table.push(event("/b", "3"));

        assert_eq!(table.drain_all().len(), 3);
        assert!(table.take_batch(Path::new("/a")).is_empty());
    }
}
