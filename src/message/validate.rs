//! Structural check applied to every candidate commit message.

use super::error::ValidationError;

/// Maximum length of the summary line, in characters.
pub const MAX_FIRST_LINE_CHARS: usize = 100;

/// Cleans up a raw model or ticket reply and checks its shape.
///
/// Surrounding whitespace, a wrapping code fence and wrapping quotes are
/// removed. The result must be non-empty with a first line of at most
/// [`MAX_FIRST_LINE_CHARS`] characters.
pub fn validate_message(raw: &str) -> Result<String, ValidationError> {
    let message = strip_quotes(strip_fence(raw.trim())).trim();
    if message.is_empty() {
        return Err(ValidationError::Empty);
    }

    let first_line = message.lines().next().unwrap_or_default().trim_end();
    let length = first_line.chars().count();
    if length > MAX_FIRST_LINE_CHARS {
        return Err(ValidationError::FirstLineTooLong {
            length,
            limit: MAX_FIRST_LINE_CHARS,
        });
    }

    Ok(message.to_string())
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop an info string such as ```text on the opening line.
    match body.split_once('\n') {
        Some((info, content)) if !info.contains(' ') => content,
        _ => body,
    }
}

fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_passes_trimmed() {
        assert_eq!(
            validate_message("  feat: add watcher\n\nBody text.\n").unwrap(),
            "feat: add watcher\n\nBody text."
        );
    }

    #[test]
    fn fences_and_quotes_are_removed() {
        assert_eq!(
            validate_message("```text\nfix: handle empty diff\n```").unwrap(),
            "fix: handle empty diff"
        );
        assert_eq!(
            validate_message("\"docs: update readme\"").unwrap(),
            "docs: update readme"
        );
    }

    #[test]
    fn empty_is_rejected() {
        assert_eq!(validate_message("   \n"), Err(ValidationError::Empty));
        assert_eq!(validate_message("``````"), Err(ValidationError::Empty));
    }

    #[test]
    fn long_first_line_is_rejected() {
        let long = format!("feat: {}", "x".repeat(MAX_FIRST_LINE_CHARS));
        assert!(matches!(
            validate_message(&long),
            Err(ValidationError::FirstLineTooLong { limit: MAX_FIRST_LINE_CHARS, .. })
        ));

        let exact = "y".repeat(MAX_FIRST_LINE_CHARS);
        assert!(validate_message(&exact).is_ok());
    }
}
