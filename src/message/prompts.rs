//! Prompt templates for commit message generation.

/// Style guide used when none is configured.
pub const DEFAULT_STYLE_GUIDE: &str = r#"## Commit Message Format

Follow conventional commit format:

```
<type>(<scope>): <description>

[optional body]
```

## Types
- `feat`: New features or enhancements
- `fix`: Bug fixes
- `docs`: Documentation changes
- `style`: Formatting only
- `refactor`: Code restructuring without behaviour change
- `test`: Adding or updating tests
- `chore`: Maintenance tasks, dependency updates

## Guidelines
- Use lowercase for description
- No period at the end of description
- Use imperative mood ("add" not "added")
- Keep the first line under 72 characters
"#;

/// System prompt for commit message generation.
pub const COMMIT_SYSTEM_PROMPT: &str = r#"You write git commit messages for changes made in a working tree.

Base the message on the ACTUAL CODE CHANGES in the diff: lines starting with + were added and lines starting with - were removed. Describe what the change does, not where it lives.

Respond with the commit message only. No explanations, no surrounding quotes, no code fences."#;

/// Diff text beyond this many bytes is cut before it is sent.
pub const MAX_DIFF_BYTES: usize = 48 * 1024;

/// Builds the user prompt for one stage/commit cycle.
pub fn generate_commit_prompt(diff: &str, style_guide: &str, paths: &[String]) -> String {
    let style_guide = if style_guide.trim().is_empty() {
        DEFAULT_STYLE_GUIDE
    } else {
        style_guide
    };

    let mut prompt = String::new();
    prompt.push_str("Follow this commit message style guide:\n\n");
    prompt.push_str(style_guide);
    prompt.push_str("\n\n");

    if !paths.is_empty() {
        prompt.push_str("Files changed:\n");
        for path in paths {
            prompt.push_str(&format!("- {path}\n"));
        }
        prompt.push('\n');
    }

    let (diff, truncated) = truncate_diff(diff);
    prompt.push_str("Git diff:\n```diff\n");
    prompt.push_str(diff);
    if !diff.ends_with('\n') {
        prompt.push('\n');
    }
    if truncated {
        prompt.push_str("... (diff truncated)\n");
    }
    prompt.push_str("```\n\nCommit message:");
    prompt
}

/// Cuts `diff` to at most [`MAX_DIFF_BYTES`] on a character boundary.
fn truncate_diff(diff: &str) -> (&str, bool) {
    if diff.len() <= MAX_DIFF_BYTES {
        return (diff, false);
    }
    let mut end = MAX_DIFF_BYTES;
    while !diff.is_char_boundary(end) {
        end -= 1;
    }
    (&diff[..end], true)
}
