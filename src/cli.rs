//! CLI interface for auto-commit.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Settings;

pub mod config;
pub mod output;
pub mod policy;
pub mod review;
pub mod run;
pub mod status;

/// auto-commit: turns working-tree changes into policy-checked, AI-written commits.
#[derive(Parser)]
#[command(name = "auto-commit")]
#[command(
    about = "Turns working-tree changes into policy-checked, AI-written commits",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Settings file (defaults to $XDG_CONFIG_HOME/auto-commit/config.yaml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Watches the configured repositories and commits their changes.
    Run(run::RunCommand),
    /// Lists and decides paths awaiting review.
    Review(review::ReviewCommand),
    /// Shows how a path is classified.
    Classify(policy::ClassifyCommand),
    /// Records the built-in ignore patterns in a repository's .gitignore.
    #[command(name = "seed-defaults")]
    SeedDefaults(policy::SeedDefaultsCommand),
    /// Lists failed events and halted repositories.
    Status(status::StatusCommand),
    /// Clears a repository halt and requeues its failed events.
    Resume(status::ResumeCommand),
    /// Settings operations.
    Config(config::ConfigCommand),
}

impl Cli {
    /// Executes the CLI command.
    pub async fn execute(self) -> Result<()> {
        let settings = Settings::load(self.config.as_deref())?;
        match self.command {
            Commands::Run(cmd) => cmd.execute(settings).await,
            Commands::Review(cmd) => cmd.execute(&settings),
            Commands::Classify(cmd) => cmd.execute(&settings),
            Commands::SeedDefaults(cmd) => cmd.execute(&settings),
            Commands::Status(cmd) => cmd.execute(&settings),
            Commands::Resume(cmd) => cmd.execute(&settings),
            Commands::Config(cmd) => cmd.execute(&settings),
        }
    }
}

/// Canonical form of a repository root given on the command line; the
/// current directory when absent.
pub(crate) fn resolve_root(root: Option<&Path>) -> Result<PathBuf> {
    let root = match root {
        Some(root) => root.to_path_buf(),
        None => env::current_dir().context("Failed to determine current directory")?,
    };
    root.canonicalize()
        .with_context(|| format!("Repository root does not exist: {}", root.display()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["auto-commit", "status", "--config", "/tmp/c.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yaml")));
        assert!(matches!(cli.command, Commands::Status(_)));
    }

    #[test]
    fn resolve_root_canonicalizes() {
        let dir = tempfile::TempDir::new().unwrap();
        let nested = dir.path().join("a");
        std::fs::create_dir(&nested).unwrap();
        let resolved = resolve_root(Some(&nested.join("..").join("a"))).unwrap();
        assert_eq!(resolved, nested.canonicalize().unwrap());
        assert!(resolve_root(Some(&dir.path().join("missing"))).is_err());
    }
}
