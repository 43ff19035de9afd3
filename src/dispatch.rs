//! Event intake, per-repository serialization and the stage/commit pipeline.

pub mod dispatcher;
pub mod event;
pub mod guard;
pub mod ledger;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle, DispatcherParts};
pub use event::{ChangeEvent, ChangeKind, CommitOutcome, ErrorKind, EventState};
pub use guard::{Admission, GuardTable};
pub use ledger::{FailedEvent, FailureLedger, HaltedRepository, Resumed};
