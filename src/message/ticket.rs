//! Escalation tickets: asking a human for a commit message.

pub mod linear;

use std::future::Future;
use std::pin::Pin;

use super::error::TicketError;
use super::validate::validate_message;

/// Title prefix of every escalation ticket.
pub const TICKET_TITLE_PREFIX: &str = "Auto-commit: Commit message needed";

/// Opening of the ticket description. Comments starting with it are our own.
pub const TICKET_MARKER: &str = "**Auto-commit";

/// Number of changed paths named in a ticket title.
const TITLE_PATHS: usize = 3;

/// Content of an escalation ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    /// One-line summary.
    pub title: String,
    /// Markdown body with the changed files, the diff and reply instructions.
    pub description: String,
}

impl TicketRequest {
    /// Builds the ticket asking for a message for `diff`.
    pub fn for_commit(diff: &str, paths: &[String]) -> Self {
        let mut title = format!("{TICKET_TITLE_PREFIX} - ");
        title.push_str(
            &paths
                .iter()
                .take(TITLE_PATHS)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        );
        if paths.len() > TITLE_PATHS {
            title.push_str("...");
        }

        let files = paths
            .iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n");

        let description = format!(
            "{TICKET_MARKER} needs a commit message**

The text-generation backend is unavailable, so a human needs to write this commit message.

**Files changed:**
{files}

**Diff:**
```diff
{diff}
```

**Instructions:**
Reply to this ticket with a conventional commit message describing these changes. A fenced code block is preferred.

**Expected format:**
```
type(scope): description

Optional longer description
```
"
        );

        Self { title, description }
    }
}

/// State of an escalation ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketStatus {
    /// Nobody has supplied a usable message yet.
    Pending,
    /// A usable message was found.
    Resolved(String),
}

/// External ticket system used when the model cannot produce a message.
pub trait TicketSystem: Send + Sync {
    /// Opens a ticket and returns its id.
    fn create_ticket<'a>(
        &'a self,
        request: &'a TicketRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, TicketError>> + Send + 'a>>;

    /// Checks a ticket for a reply.
    fn poll_ticket<'a>(
        &'a self,
        ticket_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TicketStatus, TicketError>> + Send + 'a>>;
}

/// Picks a commit message out of ticket comments given oldest first.
///
/// Newer comments win. Within a comment, fenced code blocks are tried before
/// the comment as a whole. Our own comments and replies that do not look like
/// a commit message are skipped.
pub fn extract_reply<S: AsRef<str>>(comments: &[S]) -> Option<String> {
    comments.iter().rev().find_map(|comment| {
        let content = comment.as_ref().trim();
        if content.is_empty() || content.starts_with(TICKET_MARKER) {
            return None;
        }
        fenced_blocks(content)
            .into_iter()
            .chain(std::iter::once(content.to_string()))
            .find_map(|candidate| accept_reply(&candidate))
    })
}

fn fenced_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(lines) => blocks.push(lines.join("\n")),
                None => current = Some(Vec::new()),
            }
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }
    blocks
}

/// Conventional-commit shaped and not a question.
fn accept_reply(candidate: &str) -> Option<String> {
    let message = validate_message(candidate).ok()?;
    let first_line = message.lines().next()?.trim();
    let lower = first_line.to_lowercase();
    let looks_like_commit = first_line.contains(':')
        && !first_line.ends_with('?')
        && !["please", "can you", "how"]
            .iter()
            .any(|prefix| lower.starts_with(prefix));
    looks_like_commit.then_some(message)
}
