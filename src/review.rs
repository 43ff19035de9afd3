//! Durable queue of ambiguous paths awaiting a human decision.

pub mod error;
pub mod queue;

pub use error::ReviewError;
pub use queue::{
    AppliedDecision, EnqueueOutcome, QueueStats, ReviewAction, ReviewDecision, ReviewItem,
    ReviewQueue, ReviewStatus,
};
