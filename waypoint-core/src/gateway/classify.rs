//! Second-stage classification of command output
//!
//! Some gateways report success even when the command printed a failure
//! (remote bridges, shells that swallow exit codes). The throttler runs
//! every result through [`detect_failure`], which only applies the general
//! rows; successful output may list arbitrary file names. Push handling
//! runs the full table through [`classify`] on the output of failed pushes
//! to tell upstream and non-fast-forward rejections apart.
//!
//! | Pattern | Match | Kind | Scope |
//! |---|---|---|---|
//! | `fatal:` | line prefix | `Fatal` | general |
//! | `error:` / `Error:` | line prefix | `Error` | general |
//! | `command not found` | line suffix | `Fatal` | general |
//! | `[rejected]`, `non-fast-forward`, `fetch first`, `Updates were rejected` | anywhere | `NonFastForward` | push |
//! | `has no upstream branch`, `no upstream configured`, `--set-upstream` | anywhere | `NoUpstream` | push |
//!
//! Rows are checked top to bottom per line; the most specific push kind
//! wins over the generic `Error`/`Fatal` kinds for the same output.

/// Category of a detected failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Generic fatal error (`fatal:`)
    Fatal,
    /// Generic error line (`error:`)
    Error,
    /// Remote refused a non-fast-forward update
    NonFastForward,
    /// Branch has no upstream configured
    NoUpstream,
}

impl FailureKind {
    fn specificity(self) -> u8 {
        match self {
            FailureKind::Error => 0,
            FailureKind::Fatal => 1,
            FailureKind::NoUpstream => 2,
            FailureKind::NonFastForward => 3,
        }
    }
}

/// How a pattern is matched against a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Trimmed line starts with the marker
    Prefix,
    /// Trimmed line ends with the marker
    Suffix,
    /// Marker appears anywhere in the line
    Contains,
}

/// Which outputs a pattern is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every command result
    General,
    /// Only failed push output
    Push,
}

/// One row of the pattern table
#[derive(Debug, Clone, Copy)]
pub struct FailurePattern {
    pub marker: &'static str,
    pub mode: MatchMode,
    pub kind: FailureKind,
    pub scope: Scope,
}

/// The pattern table, in evaluation order
pub const PATTERNS: &[FailurePattern] = &[
    FailurePattern {
        marker: "fatal:",
        mode: MatchMode::Prefix,
        kind: FailureKind::Fatal,
        scope: Scope::General,
    },
    FailurePattern {
        marker: "error:",
        mode: MatchMode::Prefix,
        kind: FailureKind::Error,
        scope: Scope::General,
    },
    FailurePattern {
        marker: "Error:",
        mode: MatchMode::Prefix,
        kind: FailureKind::Error,
        scope: Scope::General,
    },
    FailurePattern {
        marker: "command not found",
        mode: MatchMode::Suffix,
        kind: FailureKind::Fatal,
        scope: Scope::General,
    },
    FailurePattern {
        marker: "[rejected]",
        mode: MatchMode::Contains,
        kind: FailureKind::NonFastForward,
        scope: Scope::Push,
    },
    FailurePattern {
        marker: "non-fast-forward",
        mode: MatchMode::Contains,
        kind: FailureKind::NonFastForward,
        scope: Scope::Push,
    },
    FailurePattern {
        marker: "fetch first",
        mode: MatchMode::Contains,
        kind: FailureKind::NonFastForward,
        scope: Scope::Push,
    },
    FailurePattern {
        marker: "Updates were rejected",
        mode: MatchMode::Contains,
        kind: FailureKind::NonFastForward,
        scope: Scope::Push,
    },
    FailurePattern {
        marker: "has no upstream branch",
        mode: MatchMode::Contains,
        kind: FailureKind::NoUpstream,
        scope: Scope::Push,
    },
    FailurePattern {
        marker: "no upstream configured",
        mode: MatchMode::Contains,
        kind: FailureKind::NoUpstream,
        scope: Scope::Push,
    },
    FailurePattern {
        marker: "--set-upstream",
        mode: MatchMode::Contains,
        kind: FailureKind::NoUpstream,
        scope: Scope::Push,
    },
];

/// A failure found in command output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSignal {
    pub kind: FailureKind,
    /// The line that matched
    pub line: String,
}

/// Scan `output` against every row of [`PATTERNS`]
///
/// Returns the most specific signal found, or `None` when the output looks
/// clean.
pub fn classify(output: &str) -> Option<FailureSignal> {
    scan(output, |_| true)
}

/// Scan `output` against the general rows only
pub fn detect_failure(output: &str) -> Option<FailureSignal> {
    scan(output, |pattern| pattern.scope == Scope::General)
}

fn scan(output: &str, applies: impl Fn(&FailurePattern) -> bool) -> Option<FailureSignal> {
    let mut best: Option<FailureSignal> = None;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        for pattern in PATTERNS.iter().filter(|p| applies(p)) {
            let hit = match pattern.mode {
                MatchMode::Prefix => trimmed.starts_with(pattern.marker),
                MatchMode::Suffix => trimmed.ends_with(pattern.marker),
                MatchMode::Contains => trimmed.contains(pattern.marker),
            };
            if !hit {
                continue;
            }

            let better = best
                .as_ref()
                .map_or(true, |b| pattern.kind.specificity() > b.kind.specificity());
            if better {
                best = Some(FailureSignal {
                    kind: pattern.kind,
                    line: trimmed.to_string(),
                });
            }
        }
    }

    best
}
