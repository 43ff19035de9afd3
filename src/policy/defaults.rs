//! Built-in ignore patterns.

use super::pattern::{PatternSet, PatternSource};

/// Patterns ignored when no user-authored rule says otherwise.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "node_modules/",
    "__pycache__/",
    "*.pyc",
    ".pytest_cache/",
    ".coverage",
    "*.log",
    ".DS_Store",
    "Thumbs.db",
    ".env",
    ".venv/",
    "venv/",
    "env/",
    "dist/",
    "build/",
    "*.egg-info/",
    ".mypy_cache/",
    ".tox/",
];

/// Compiles [`DEFAULT_IGNORE_PATTERNS`] into a pattern set.
pub fn default_ignore_set() -> PatternSet {
    PatternSet::from_patterns(PatternSource::Default, DEFAULT_IGNORE_PATTERNS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_pattern_compiles() {
        assert_eq!(
            default_ignore_set().patterns().len(),
            DEFAULT_IGNORE_PATTERNS.len()
        );
    }
}
