//! Review queue commands.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use termcolor::Color;
use uuid::Uuid;

use super::output::{stdout, write_heading, write_label};
use super::resolve_root;
use crate::config::Settings;
use crate::git::Git2Gateway;
use crate::policy::Scope;
use crate::review::{ReviewAction, ReviewDecision, ReviewError, ReviewItem, ReviewQueue};

/// Characters of an item id shown in listings.
const SHORT_ID_LEN: usize = 8;

/// Review queue operations.
#[derive(Parser)]
pub struct ReviewCommand {
    /// Review subcommand to execute.
    #[command(subcommand)]
    pub command: ReviewSubcommands,
}

/// Review subcommands.
#[derive(Subcommand)]
pub enum ReviewSubcommands {
    /// Lists pending items, oldest first.
    List(ListCommand),
    /// Applies a decision to a pending item.
    Decide(DecideCommand),
    /// Shows pending and resolved counts.
    Stats,
}

/// List command options.
#[derive(Parser)]
pub struct ListCommand {
    /// Only show items for this repository.
    #[arg(long, value_name = "PATH")]
    pub root: Option<PathBuf>,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Where a decision is recorded.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ScopeArg {
    /// The repository's .gitinclude/.gitignore.
    Project,
    /// The global include/ignore files.
    Global,
}

impl From<ScopeArg> for Scope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Project => Self::Project,
            ScopeArg::Global => Self::Global,
        }
    }
}

/// What to do with the path.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ActionArg {
    /// Always commit the path.
    Include,
    /// Never commit the path.
    Ignore,
    /// Close the item without recording a pattern.
    NoAction,
}

impl From<ActionArg> for ReviewAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Include => Self::Include,
            ActionArg::Ignore => Self::Ignore,
            ActionArg::NoAction => Self::NoAction,
        }
    }
}

/// Decide command options.
#[derive(Parser)]
pub struct DecideCommand {
    /// Item id, or a unique prefix of it.
    #[arg(value_name = "ID")]
    pub id: String,

    /// Policy scope the pattern is written to.
    #[arg(long, value_enum, default_value = "project")]
    pub scope: ScopeArg,

    /// Decision for the path.
    #[arg(long, value_enum)]
    pub action: ActionArg,
}

impl ReviewCommand {
    /// Executes the review command.
    pub fn execute(self, settings: &Settings) -> Result<()> {
        let queue = open_queue(settings)?;
        match self.command {
            ReviewSubcommands::List(cmd) => cmd.execute(&queue),
            ReviewSubcommands::Decide(cmd) => cmd.execute(&queue),
            ReviewSubcommands::Stats => {
                let stats = queue.stats();
                println!(
                    "pending: {}\nresolved: {}\ntotal: {}",
                    stats.pending,
                    stats.resolved,
                    stats.total()
                );
                Ok(())
            }
        }
    }
}

impl ListCommand {
    fn execute(self, queue: &ReviewQueue) -> Result<()> {
        let root = self.root.as_deref().map(|r| resolve_root(Some(r))).transpose()?;
        let pending = queue.list_pending(root.as_deref());

        if self.json {
            println!("{}", serde_json::to_string_pretty(&pending)?);
            return Ok(());
        }
        if pending.is_empty() {
            println!("No paths awaiting review.");
            return Ok(());
        }

        let mut out = stdout();
        write_heading(&mut out, &format!("{} path(s) awaiting review", pending.len()))?;
        for item in &pending {
            write_label(&mut out, Color::Cyan, &short_id(item.id))?;
            let kind = item
                .change_kind
                .map(|k| format!(" ({k})"))
                .unwrap_or_default();
            writeln!(
                out,
                "  {}{kind}  {}  first seen {}",
                item.path,
                item.repository_root.display(),
                item.first_seen_at.format("%Y-%m-%d %H:%M:%S")
            )?;
        }
        Ok(())
    }
}

impl DecideCommand {
    fn execute(self, queue: &ReviewQueue) -> Result<()> {
        let item = find_item(queue, &self.id)?;
        let decision = ReviewDecision {
            item_id: item.id,
            scope: self.scope.into(),
            action: self.action.into(),
        };

        match queue.apply_decision(decision) {
            Ok(resolved) => {
                let mut out = stdout();
                write_label(&mut out, Color::Green, "resolved")?;
                let pattern = resolved
                    .decision
                    .as_ref()
                    .and_then(|d| d.pattern.clone())
                    .map(|p| format!(", recorded {p:?} in {} scope", decision.scope))
                    .unwrap_or_default();
                writeln!(out, " {} as {}{pattern}", resolved.path, decision.action)?;
                Ok(())
            }
            Err(ReviewError::AlreadyResolved(id)) => {
                println!("Item {} was already resolved; nothing changed.", short_id(id));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn open_queue(settings: &Settings) -> Result<ReviewQueue> {
    let engine = Arc::new(settings.build_engine(Arc::new(Git2Gateway::new()))?);
    Ok(ReviewQueue::open(settings.review_queue_path()?, engine)?)
}

/// Looks an item up by full id or by a prefix matching exactly one item.
fn find_item(queue: &ReviewQueue, id: &str) -> Result<ReviewItem> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return queue
            .get(uuid)
            .ok_or_else(|| ReviewError::NotFound(uuid).into());
    }

    let prefix = id.to_ascii_lowercase();
    let mut matches = queue
        .list_pending(None)
        .into_iter()
        .filter(|item| item.id.to_string().starts_with(&prefix));
    match (matches.next(), matches.next()) {
        (Some(item), None) => Ok(item),
        (None, _) => bail!("No pending review item matches {id:?}"),
        (Some(_), Some(_)) => bail!("Id prefix {id:?} is ambiguous"),
    }
}

fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(SHORT_ID_LEN).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::git::RepositoryGateway;
    use crate::policy::{ClassificationEngine, PatternStore};
    use std::path::Path;
    use tempfile::TempDir;

    fn queue_with_items(paths: &[&str]) -> (TempDir, ReviewQueue, Vec<ReviewItem>) {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        let gateway = Git2Gateway::new();
        gateway.init(&repo).unwrap();
        let engine = Arc::new(ClassificationEngine::new(
            Arc::new(PatternStore::new(dir.path().join("policy"))),
            Arc::new(gateway),
        ));
        let queue = ReviewQueue::open(dir.path().join("queue.json"), engine).unwrap();
        let items = paths
            .iter()
            .map(|p| {
                queue
                    .enqueue_if_absent(Path::new(p), &repo, None)
                    .unwrap()
                    .item()
                    .cloned()
                    .unwrap()
            })
            .collect();
        (dir, queue, items)
    }

    #[test]
    fn finds_items_by_full_id_and_prefix() {
        let (_dir, queue, items) = queue_with_items(&["a.txt"]);
        let id = items[0].id;

        assert_eq!(find_item(&queue, &id.to_string()).unwrap().id, id);
        assert_eq!(find_item(&queue, &short_id(id)).unwrap().id, id);
        assert!(find_item(&queue, "zzzz").is_err());
    }

    #[test]
    fn empty_prefix_is_ambiguous_with_several_items() {
        let (_dir, queue, _items) = queue_with_items(&["a.txt", "b.txt"]);
        let err = find_item(&queue, "").unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn parses_decide_arguments() {
        let cmd = DecideCommand::try_parse_from(["decide", "1234", "--action", "no-action"]).unwrap();
        assert!(matches!(cmd.scope, ScopeArg::Project));
        assert_eq!(ReviewAction::from(cmd.action), ReviewAction::NoAction);
    }
}
