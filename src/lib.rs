//! # auto-commit
//!
//! Watches working trees and turns file changes into local commits.
//!
//! Every changed path is classified against four policy files (project and
//! global include/ignore lists) plus built-in ignore defaults. Included
//! paths are staged and committed with a message from a text-generation
//! backend; ignored paths are dropped; anything else waits in a durable
//! review queue until a human decides, and the decision is written back as
//! a pattern so the same path is never asked about twice.
//!
//! ## Components
//!
//! - [`policy`]: pattern resolution and classification
//! - [`review`]: the review queue
//! - [`dispatch`]: worker pool with per-repository serialization
//! - [`message`]: message generation with retry, validation and ticket escalation
//! - [`git`]: the repository gateway
//! - [`watch`]: filesystem notification source
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use auto_commit::git::Git2Gateway;
//! use auto_commit::policy::{ClassificationEngine, PatternStore, Verdict};
//!
//! let engine = ClassificationEngine::new(
//!     Arc::new(PatternStore::new("/etc/auto-commit")),
//!     Arc::new(Git2Gateway::new()),
//! );
//! let resolution = engine.resolve(Path::new("src/main.rs"), Path::new("/work/site"))?;
//! if resolution.verdict == Verdict::Ambiguous {
//!     println!("needs review");
//! }
//! # Ok::<(), auto_commit::policy::PolicyError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod git;
pub mod message;
pub mod policy;
pub mod review;
pub mod utils;
pub mod watch;

pub use crate::cli::Cli;

/// The current version of auto-commit.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
