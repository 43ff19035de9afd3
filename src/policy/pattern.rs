//! Pure path classification over ordered pattern sets.
//!
//! Nothing in this module touches the filesystem: pattern sets are parsed
//! from text handed in by the caller and [`resolve`] is a deterministic
//! function of a path and the sets passed to it.

use std::fmt;
use std::iter;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Classification outcome for a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The path is committed automatically.
    Include,
    /// The path is never committed.
    Ignore,
    /// No pattern covers the path; a human has to decide.
    Ambiguous,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Include => write!(f, "include"),
            Self::Ignore => write!(f, "ignore"),
            Self::Ambiguous => write!(f, "ambiguous"),
        }
    }
}

/// Which pattern list a rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    /// `<root>/.gitinclude`.
    ProjectInclude,
    /// Process-wide include file.
    GlobalInclude,
    /// `<root>/.gitignore`.
    ProjectIgnore,
    /// Process-wide ignore file.
    GlobalIgnore,
    /// Built-in default ignore patterns.
    Default,
}

impl PatternSource {
    /// Returns true for the two include sources.
    pub fn is_include(self) -> bool {
        matches!(self, Self::ProjectInclude | Self::GlobalInclude)
    }

    /// Returns true for the built-in default patterns.
    pub fn is_default(self) -> bool {
        matches!(self, Self::Default)
    }
}

impl fmt::Display for PatternSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectInclude => write!(f, "project include"),
            Self::GlobalInclude => write!(f, "global include"),
            Self::ProjectIgnore => write!(f, "project ignore"),
            Self::GlobalIgnore => write!(f, "global ignore"),
            Self::Default => write!(f, "default ignore"),
        }
    }
}

/// A single compiled glob pattern.
///
/// Patterns containing a `/` before any trailing slash are anchored at the
/// repository root and tested against every leading prefix of the path.
/// Unanchored patterns are tested against every path component, so `*.log`
/// and `node_modules/` match at any depth. `*` never crosses a `/`.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    anchored: bool,
    matcher: GlobMatcher,
}

impl Pattern {
    /// Compiles a pattern exactly as it appears in a policy file.
    pub fn new(raw: &str) -> Result<Self, globset::Error> {
        let raw = raw.trim();
        let body = raw.trim_end_matches('/');
        let anchored = body.contains('/');
        let body = body.trim_start_matches('/');

        let matcher = GlobBuilder::new(body)
            .literal_separator(true)
            .build()?
            .compile_matcher();

        Ok(Self {
            raw: raw.to_string(),
            anchored,
            matcher,
        })
    }

    /// The pattern text as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Tests a normalized, root-relative path.
    pub fn matches(&self, path: &str) -> bool {
        if self.anchored {
            path.match_indices('/')
                .map(|(i, _)| &path[..i])
                .chain(iter::once(path))
                .any(|prefix| self.matcher.is_match(prefix))
        } else {
            path.split('/')
                .any(|component| self.matcher.is_match(component))
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Ordered list of patterns loaded from one source.
#[derive(Debug, Clone)]
pub struct PatternSet {
    source: PatternSource,
    patterns: Vec<Pattern>,
}

impl PatternSet {
    /// Creates an empty set.
    pub fn new(source: PatternSource) -> Self {
        Self {
            source,
            patterns: Vec::new(),
        }
    }

    /// Parses line-oriented policy file content.
    ///
    /// Blank lines, `#` comments and `!` negations are skipped. Lines that do
    /// not compile as globs are skipped with a warning.
    pub fn parse(source: PatternSource, content: &str) -> Self {
        Self::from_patterns(
            source,
            content.lines().map(str::trim).filter(|line| {
                !line.is_empty() && !line.starts_with('#') && !line.starts_with('!')
            }),
        )
    }

    /// Builds a set from individual pattern strings.
    pub fn from_patterns<I, S>(source: PatternSource, raw_patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = raw_patterns
            .into_iter()
            .filter_map(|raw| match Pattern::new(raw.as_ref()) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(source = %source, pattern = raw.as_ref(), "Skipping invalid pattern: {e}");
                    None
                }
            })
            .collect();

        Self { source, patterns }
    }

    /// The source this set was loaded from.
    pub fn source(&self) -> PatternSource {
        self.source
    }

    /// Patterns in file order.
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// Returns true when no patterns were loaded.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns true if the exact pattern text is already present.
    pub fn contains(&self, raw: &str) -> bool {
        let raw = raw.trim();
        self.patterns.iter().any(|p| p.as_str() == raw)
    }

    /// First pattern in file order that matches the path.
    pub fn first_match(&self, path: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.matches(path))
    }
}

/// The rule that decided a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRule {
    /// Set the pattern belongs to.
    pub source: PatternSource,
    /// Pattern text as written.
    pub pattern: String,
}

/// Verdict together with the rule responsible for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The classification.
    pub verdict: Verdict,
    /// Matching rule, absent for [`Verdict::Ambiguous`].
    pub rule: Option<MatchedRule>,
}

impl Resolution {
    fn from_match(verdict: Verdict, source: PatternSource, pattern: &Pattern) -> Self {
        Self {
            verdict,
            rule: Some(MatchedRule {
                source,
                pattern: pattern.as_str().to_string(),
            }),
        }
    }

    /// Returns true when the deciding rule is a built-in default pattern.
    pub fn decided_by_default(&self) -> bool {
        self.rule.as_ref().is_some_and(|r| r.source.is_default())
    }
}

/// Classifies a path against ordered include and ignore sets.
///
/// Include sets are consulted first and any include match wins over every
/// ignore match. Ignore sets are consulted in the given order, followed by
/// the default patterns. A path matched by nothing is ambiguous.
pub fn resolve(
    path: &str,
    include_sets: &[PatternSet],
    ignore_sets: &[PatternSet],
    default_ignores: &PatternSet,
) -> Resolution {
    let path = normalize_path(path);

    for set in include_sets {
        if let Some(pattern) = set.first_match(&path) {
            return Resolution::from_match(Verdict::Include, set.source(), pattern);
        }
    }

    for set in ignore_sets.iter().chain(iter::once(default_ignores)) {
        if let Some(pattern) = set.first_match(&path) {
            return Resolution::from_match(Verdict::Ignore, set.source(), pattern);
        }
    }

    Resolution {
        verdict: Verdict::Ambiguous,
        rule: None,
    }
}

/// Converts a root-relative path into the `/`-separated form patterns expect.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut trimmed = path.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.trim_start_matches('/').to_string()
}
