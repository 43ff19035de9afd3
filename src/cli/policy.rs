//! Classification and default-pattern commands.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use termcolor::Color;

use super::output::{stdout, verdict_color, write_label};
use super::resolve_root;
use crate::config::Settings;
use crate::git::Git2Gateway;

/// Classify command options.
#[derive(Parser)]
pub struct ClassifyCommand {
    /// Paths to classify, absolute or relative to the repository root.
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Repository root (defaults to the current directory).
    #[arg(long, value_name = "PATH")]
    pub root: Option<PathBuf>,
}

impl ClassifyCommand {
    /// Executes the classify command. Nothing is written to the policy files.
    pub fn execute(self, settings: &Settings) -> Result<()> {
        let root = resolve_root(self.root.as_deref())?;
        let engine = settings.build_engine(Arc::new(Git2Gateway::new()))?;
        let mut out = stdout();

        for path in &self.paths {
            let resolution = engine.resolve(path, &root)?;
            write_label(
                &mut out,
                verdict_color(resolution.verdict),
                &format!("{:<9}", resolution.verdict.to_string()),
            )?;
            match &resolution.rule {
                Some(rule) => writeln!(
                    out,
                    " {}  ({} {:?})",
                    path.display(),
                    rule.source,
                    rule.pattern
                )?,
                None => writeln!(out, " {}  (no matching pattern)", path.display())?,
            }
        }
        Ok(())
    }
}

/// Seed-defaults command options.
#[derive(Parser)]
pub struct SeedDefaultsCommand {
    /// Repository root (defaults to the current directory).
    #[arg(long, value_name = "PATH")]
    pub root: Option<PathBuf>,
}

impl SeedDefaultsCommand {
    /// Executes the seed-defaults command.
    pub fn execute(self, settings: &Settings) -> Result<()> {
        let root = resolve_root(self.root.as_deref())?;
        let engine = settings.build_engine(Arc::new(Git2Gateway::new()))?;
        let added = engine.seed_default_ignores(&root)?;

        if added.is_empty() {
            println!("No default patterns added to {}.", root.display());
            return Ok(());
        }
        let mut out = stdout();
        for pattern in &added {
            write_label(&mut out, Color::Green, "added")?;
            writeln!(out, " {pattern}")?;
        }
        Ok(())
    }
}
