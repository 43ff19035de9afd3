//! Colored terminal output for the inspection commands.

use std::io::{self, IsTerminal};

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::dispatch::ErrorKind;
use crate::policy::Verdict;

/// Standard output with color when attached to a terminal.
pub fn stdout() -> StandardStream {
    let choice = if io::stdout().is_terminal() {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    StandardStream::stdout(choice)
}

/// Writes `label` in bold `color`, then resets.
pub fn write_label<W: WriteColor>(out: &mut W, color: Color, label: &str) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
    write!(out, "{label}")?;
    out.reset()
}

/// Writes a section heading followed by a newline.
pub fn write_heading<W: WriteColor>(out: &mut W, heading: &str) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_bold(true).set_underline(true))?;
    write!(out, "{heading}")?;
    out.reset()?;
    writeln!(out)
}

/// Color used for a verdict.
pub fn verdict_color(verdict: Verdict) -> Color {
    match verdict {
        Verdict::Include => Color::Green,
        Verdict::Ignore => Color::Yellow,
        Verdict::Ambiguous => Color::Cyan,
    }
}

/// Color used for a failure kind.
pub fn error_kind_color(kind: ErrorKind) -> Color {
    match kind {
        ErrorKind::DirtyWorkingTree | ErrorKind::RepositoryHalted | ErrorKind::Configuration => {
            Color::Red
        }
        ErrorKind::Cancelled | ErrorKind::Shutdown | ErrorKind::TimedOut => Color::Yellow,
        ErrorKind::Gateway | ErrorKind::Generation | ErrorKind::Escalation => Color::Magenta,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use termcolor::Buffer;

    #[test]
    fn plain_buffer_has_no_escape_codes() {
        let mut buffer = Buffer::no_color();
        write_label(&mut buffer, verdict_color(Verdict::Include), "include").unwrap();
        write_heading(&mut buffer, "Pending").unwrap();
        assert_eq!(String::from_utf8(buffer.into_inner()).unwrap(), "includePending\n");
    }

    #[test]
    fn ansi_buffer_is_colored() {
        let mut buffer = Buffer::ansi();
        write_label(&mut buffer, error_kind_color(ErrorKind::DirtyWorkingTree), "halted").unwrap();
        let rendered = String::from_utf8(buffer.into_inner()).unwrap();
        assert!(rendered.contains("\u{1b}["));
        assert!(rendered.contains("halted"));
    }
}
