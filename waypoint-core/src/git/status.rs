//! Parsers for `git status`, `git diff --numstat` and `wc -l` output

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// How a path changed in the working tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One changed path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Path relative to the repository root (new path for renames)
    pub path: String,
    pub kind: ChangeKind,
    /// Whether git does not track the file yet
    pub untracked: bool,
}

/// Parse `git status --porcelain=v1 -z` output
///
/// Entries are NUL separated; renames and copies carry the original path as
/// an extra NUL-terminated field which is skipped. Paths are deduplicated,
/// keeping the first occurrence.
pub fn parse_porcelain_z(output: &str) -> Vec<ChangedFile> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();
    let mut fields = output.split('\0');

    while let Some(entry) = fields.next() {
        if entry.len() < 4 {
            continue;
        }
        let (code, path) = entry.split_at(3);
        let mut code = code.chars();
        let x = code.next().unwrap_or(' ');
        let y = code.next().unwrap_or(' ');

        let kind = if x == '?' || x == 'A' {
            ChangeKind::Added
        } else if x == 'R' || x == 'C' {
            // The next field is the source path
            fields.next();
            ChangeKind::Renamed
        } else if x == 'D' || y == 'D' {
            ChangeKind::Deleted
        } else {
            ChangeKind::Modified
        };

        if x == '!' {
            continue;
        }

        if seen.insert(path.to_string()) {
            files.push(ChangedFile {
                path: path.to_string(),
                kind,
                untracked: x == '?',
            });
        }
    }

    files
}

/// Totals from `git diff --numstat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineCounts {
    pub added: u64,
    pub removed: u64,
}

impl LineCounts {
    pub fn total(&self) -> u64 {
        self.added + self.removed
    }
}

/// Sum `git diff --numstat` output; binary entries (`-`) count as zero
pub fn parse_numstat(output: &str) -> LineCounts {
    let mut counts = LineCounts::default();

    for line in output.lines() {
        let mut parts = line.split('\t');
        let (Some(added), Some(removed)) = (parts.next(), parts.next()) else {
            continue;
        };
        counts.added += added.trim().parse::<u64>().unwrap_or(0);
        counts.removed += removed.trim().parse::<u64>().unwrap_or(0);
    }

    counts
}

/// Sum `wc -l -- <files>` output
///
/// `wc` prints a `total` line whenever it was given more than one file;
/// those lines are skipped so batches split by `xargs` add up correctly.
pub fn parse_wc_lines(output: &str) -> u64 {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (count, name) = line.split_once(char::is_whitespace)?;
            if name.trim() == "total" {
                return None;
            }
            count.parse::<u64>().ok()
        })
        .sum()
}

/// Split newline-separated command output into trimmed, non-empty lines
pub fn non_empty_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|l| l.trim().trim_matches('\'').to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
