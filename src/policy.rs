//! File inclusion policy: pattern resolution, policy files and classification.

pub mod defaults;
pub mod engine;
pub mod error;
pub mod pattern;
pub mod store;

pub use defaults::{default_ignore_set, DEFAULT_IGNORE_PATTERNS};
pub use engine::{is_repository_internal, ClassificationEngine};
pub use error::PolicyError;
pub use pattern::{resolve, MatchedRule, Pattern, PatternSet, PatternSource, Resolution, Verdict};
pub use store::{LoadedPolicy, PatternStore, PolicyKind, Scope};
