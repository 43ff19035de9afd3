//! The watch-and-commit daemon.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::config::Settings;
use crate::dispatch::{CommitOutcome, Dispatcher};
use crate::watch::RepositoryWatcher;

/// Run command options.
#[derive(Parser)]
pub struct RunCommand {
    /// Repository root to watch, in addition to those in the settings file.
    #[arg(long = "root", value_name = "PATH")]
    pub roots: Vec<PathBuf>,
}

impl RunCommand {
    /// Executes the run command until interrupted.
    pub async fn execute(self, settings: Settings) -> Result<()> {
        let roots = self.collect_roots(&settings)?;
        let parts = settings.build_dispatcher_parts()?;

        let pending = parts.review.stats().pending;
        if pending > 0 {
            info!(pending, "Paths awaiting review; see `auto-commit review list`");
        }
        for halted in parts.ledger.halted_repositories()? {
            warn!(root = %halted.root.display(), reason = %halted.reason, "Repository is halted; see `auto-commit resume`");
        }

        let dispatcher = Dispatcher::start(parts, settings.dispatcher_config()?);
        let outcomes = dispatcher.outcomes();
        let reporter = tokio::spawn(async move {
            while let Ok(outcome) = outcomes.recv_async().await {
                report(&outcome);
            }
        });
        let watcher = RepositoryWatcher::start(roots, dispatcher.handle())?;

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for the interrupt signal")?;
        info!("Interrupt received, shutting down");

        drop(watcher);
        dispatcher.shutdown().await;
        reporter.abort();
        Ok(())
    }

    fn collect_roots(&self, settings: &Settings) -> Result<Vec<PathBuf>> {
        let mut roots = Vec::new();
        for root in settings.roots.iter().chain(&self.roots) {
            let canonical = root
                .canonicalize()
                .with_context(|| format!("Repository root does not exist: {}", root.display()))?;
            if !roots.contains(&canonical) {
                roots.push(canonical);
            }
        }
        if roots.is_empty() {
            bail!("No repository roots configured; pass --root or list roots in the settings file");
        }
        Ok(roots)
    }
}

fn report(outcome: &CommitOutcome) {
    let root = outcome.repository_root.display();
    match (&outcome.commit_id, outcome.error_kind) {
        (Some(commit), _) => info!(
            root = %root,
            commit = %commit,
            events = outcome.events.len(),
            message = outcome.message.as_deref().unwrap_or_default(),
            "Commit created"
        ),
        (None, Some(kind)) => warn!(
            root = %root,
            error_kind = %kind,
            events = outcome.events.len(),
            "Batch failed; see `auto-commit status`"
        ),
        (None, None) => info!(root = %root, events = outcome.events.len(), "Batch produced no commit"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn roots_are_merged_canonical_and_unique() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            roots: vec![dir.path().to_path_buf()],
            ..Settings::default()
        };
        let cmd = RunCommand {
            roots: vec![dir.path().join(".")],
        };
        assert_eq!(
            cmd.collect_roots(&settings).unwrap(),
            vec![dir.path().canonicalize().unwrap()]
        );
    }

    #[test]
    fn no_roots_is_an_error() {
        let cmd = RunCommand { roots: Vec::new() };
        assert!(cmd.collect_roots(&Settings::default()).is_err());
    }
}
