//! Failure inspection and resume commands.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use termcolor::Color;

use super::output::{error_kind_color, stdout, write_heading, write_label};
use super::resolve_root;
use crate::config::Settings;
use crate::dispatch::FailureLedger;

/// Status command options.
#[derive(Parser)]
pub struct StatusCommand {
    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    /// Executes the status command.
    pub fn execute(self, settings: &Settings) -> Result<()> {
        let ledger = FailureLedger::new(settings.failure_ledger_path()?);
        let halted = ledger.halted_repositories()?;
        let failed = ledger.failed_events()?;
        let replay = ledger.replay_events()?;

        if self.json {
            let report = serde_json::json!({
                "halted": halted,
                "failed": failed,
                "replay": replay,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        let mut out = stdout();
        if halted.is_empty() && failed.is_empty() && replay.is_empty() {
            writeln!(out, "No failed events or halted repositories.")?;
            return Ok(());
        }

        if !halted.is_empty() {
            write_heading(&mut out, "Halted repositories")?;
            for repo in &halted {
                write_label(&mut out, Color::Red, "halted")?;
                writeln!(
                    out,
                    " {}  since {}",
                    repo.root.display(),
                    repo.halted_at.format("%Y-%m-%d %H:%M:%S")
                )?;
                writeln!(out, "    {}", repo.reason)?;
            }
            writeln!(out)?;
        }

        if !failed.is_empty() {
            write_heading(&mut out, "Failed events")?;
            for failure in &failed {
                write_label(
                    &mut out,
                    error_kind_color(failure.error_kind),
                    &failure.error_kind.to_string(),
                )?;
                writeln!(
                    out,
                    " {}  {}  {}",
                    failure.event.path.display(),
                    failure.event.repository_root.display(),
                    failure.failed_at.format("%Y-%m-%d %H:%M:%S")
                )?;
                writeln!(out, "    {}", failure.detail)?;
            }
            writeln!(out)?;
        }

        if !replay.is_empty() {
            writeln!(out, "{} event(s) waiting to be replayed.", replay.len())?;
        }
        Ok(())
    }
}

/// Resume command options.
#[derive(Parser)]
pub struct ResumeCommand {
    /// Repository root (defaults to the current directory).
    #[arg(long, value_name = "PATH")]
    pub root: Option<PathBuf>,
}

impl ResumeCommand {
    /// Executes the resume command.
    ///
    /// A running daemon sees the cleared halt immediately and replays the
    /// requeued events with the repository's next batch.
    pub fn execute(self, settings: &Settings) -> Result<()> {
        let root = resolve_root(self.root.as_deref())?;
        let ledger = FailureLedger::new(settings.failure_ledger_path()?);
        let resumed = ledger.resume(&root)?;

        if resumed.was_halted {
            println!("Resumed {}.", root.display());
        } else {
            println!("{} was not halted.", root.display());
        }
        if resumed.requeued > 0 {
            println!(
                "{} failed event(s) requeued for the next processing cycle.",
                resumed.requeued
            );
        }
        Ok(())
    }
}
