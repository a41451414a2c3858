//! Change detection
//!
//! Reads the working tree state through the throttler and decides whether
//! the pending changes are worth a checkpoint. Detection never mutates the
//! repository and never fails: a scan error yields an empty snapshot that
//! does not ask for a branch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git::command;
use crate::git::status::{parse_numstat, parse_porcelain_z, parse_wc_lines};
use crate::git::{ChangedFile, LineCounts};
use crate::naming::BranchType;
use crate::project::{ProjectHandle, ProjectSettings};
use crate::throttle::Priority;

/// Directory names that mark feature work
const FEATURE_SEGMENTS: &[&str] = &[
    "component",
    "components",
    "feature",
    "features",
    "pages",
    "views",
    "modules",
];

const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "toml", "yaml", "yml", "ini", "cfg", "conf", "env", "lock", "properties",
];

/// Pending changes of a working tree at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSnapshot {
    pub files: Vec<ChangedFile>,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub suggested_branch_type: BranchType,
    /// Checkpoint-style name for the suggested type; not checked for collisions
    pub suggested_branch_name: String,
    pub should_create_branch: bool,
    /// Set when the status scan failed
    pub scan_error: Option<String>,
}

impl ChangeSnapshot {
    fn empty(now: DateTime<Utc>, scan_error: Option<String>) -> Self {
        Self {
            files: Vec::new(),
            lines_added: 0,
            lines_removed: 0,
            suggested_branch_type: BranchType::Experiment,
            suggested_branch_name: suggested_name(BranchType::Experiment, now),
            should_create_branch: false,
            scan_error,
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_lines(&self) -> u64 {
        self.lines_added + self.lines_removed
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn suggested_name(branch_type: BranchType, now: DateTime<Utc>) -> String {
    format!("{}/{}", branch_type, now.format("%Y%m%dT%H%M%SZ"))
}

/// Threshold gate: enough files or enough lines, never for an empty set
pub fn meets_threshold(files: usize, lines: u64, settings: &ProjectSettings) -> bool {
    if files == 0 {
        return false;
    }
    files >= settings.min_changed_files_threshold || lines >= settings.min_changed_lines_threshold
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_config_file(path: &str) -> bool {
    let name = file_name(path).to_ascii_lowercase();
    if name.starts_with('.') || name.contains("config") {
        return true;
    }
    match name.rsplit_once('.') {
        Some((_, ext)) => CONFIG_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Suggest a branch type from the changed paths
///
/// Rules, first match wins:
/// 1. a file name containing "fix" or "bug" -> bugfix
/// 2. a component/feature directory segment -> feature
/// 3. only configuration files -> iteration
/// 4. otherwise -> experiment
pub fn suggest_branch_type(files: &[ChangedFile]) -> BranchType {
    if files.is_empty() {
        return BranchType::Experiment;
    }

    let bugfix = files.iter().any(|f| {
        let name = file_name(&f.path).to_ascii_lowercase();
        name.contains("fix") || name.contains("bug")
    });
    if bugfix {
        return BranchType::Bugfix;
    }

    let feature = files.iter().any(|f| {
        let mut segments: Vec<&str> = f.path.split('/').collect();
        segments.pop();
        segments
            .iter()
            .any(|s| FEATURE_SEGMENTS.contains(&s.to_ascii_lowercase().as_str()))
    });
    if feature {
        return BranchType::Feature;
    }

    if files.iter().all(|f| is_config_file(&f.path)) {
        return BranchType::Iteration;
    }

    BranchType::Experiment
}

/// Working tree scanner
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    /// Scan the project's working tree
    pub async fn detect(&self, handle: &ProjectHandle, priority: Priority) -> ChangeSnapshot {
        let now = Utc::now();

        let status = match handle.run(command::status_porcelain(), priority).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(project = %handle.id(), error = %e, "Status scan failed");
                return ChangeSnapshot::empty(now, Some(e.to_string()));
            }
        };

        let files = parse_porcelain_z(&status);
        if files.is_empty() {
            return ChangeSnapshot::empty(now, None);
        }

        let mut counts = self.tracked_line_counts(handle, priority).await;
        if files.iter().any(|f| f.untracked) {
            match handle.run_once(command::untracked_line_counts(), priority).await {
                Ok(output) => counts.added += parse_wc_lines(&output),
                Err(e) => {
                    tracing::debug!(project = %handle.id(), error = %e, "Untracked line count unavailable")
                }
            }
        }

        let settings = handle.settings();
        let branch_type = suggest_branch_type(&files);
        let should_create_branch = meets_threshold(files.len(), counts.total(), &settings);

        tracing::debug!(
            project = %handle.id(),
            files = files.len(),
            lines_added = counts.added,
            lines_removed = counts.removed,
            branch_type = %branch_type,
            should_create_branch,
            "Detected changes"
        );

        ChangeSnapshot {
            files,
            lines_added: counts.added,
            lines_removed: counts.removed,
            suggested_branch_type: branch_type,
            suggested_branch_name: suggested_name(branch_type, now),
            should_create_branch,
            scan_error: None,
        }
    }

    /// Line counts of tracked changes; the index is used while HEAD is unborn
    async fn tracked_line_counts(&self, handle: &ProjectHandle, priority: Priority) -> LineCounts {
        match handle.run_once(command::diff_numstat_head(), priority).await {
            Ok(output) => parse_numstat(&output),
            Err(_) => match handle.run_once(command::diff_numstat_cached(), priority).await {
                Ok(output) => parse_numstat(&output),
                Err(e) => {
                    tracing::debug!(project = %handle.id(), error = %e, "Line counts unavailable");
                    LineCounts::default()
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::ChangeKind;
    use crate::testing::{handle, ScriptedGateway};
    use std::sync::Arc;

    fn files(paths: &[&str]) -> Vec<ChangedFile> {
        paths
            .iter()
            .map(|p| ChangedFile {
                path: p.to_string(),
                kind: ChangeKind::Modified,
                untracked: false,
            })
            .collect()
    }

    #[test]
    fn test_suggest_bugfix_first() {
        let f = files(&["src/components/Button.tsx", "src/fix_login.rs"]);
        assert_eq!(suggest_branch_type(&f), BranchType::Bugfix);
        // Directory names do not count for the bugfix rule
        let f = files(&["bugs/readme.txt"]);
        assert_eq!(suggest_branch_type(&f), BranchType::Experiment);
    }

    #[test]
    fn test_suggest_feature() {
        let f = files(&["app/views/home.html", "README.md"]);
        assert_eq!(suggest_branch_type(&f), BranchType::Feature);
    }

    #[test]
    fn test_suggest_iteration_for_config_only() {
        let f = files(&["Cargo.toml", ".gitignore", "settings/app.yaml"]);
        assert_eq!(suggest_branch_type(&f), BranchType::Iteration);
        let f = files(&["Cargo.toml", "src/main.rs"]);
        assert_eq!(suggest_branch_type(&f), BranchType::Experiment);
    }

    #[test]
    fn test_threshold_gate() {
        let settings = ProjectSettings::default();
        assert!(!meets_threshold(0, 500, &settings));
        assert!(!meets_threshold(1, 3, &settings));
        assert!(meets_threshold(2, 0, &settings));
        assert!(meets_threshold(1, 50, &settings));
    }

    #[tokio::test]
    async fn test_detect_counts_tracked_and_untracked() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.ok("git status", " M src/lib.rs\0?? notes.md\0");
        gateway.ok("git diff HEAD --numstat", "10\t4\tsrc/lib.rs\n");
        gateway.ok("git ls-files --others", "  7 notes.md\n");
        let handle = handle(gateway.clone(), ProjectSettings::default());

        let snapshot = ChangeDetector.detect(&handle, Priority::Medium).await;
        assert_eq!(snapshot.file_count(), 2);
        assert_eq!(snapshot.lines_added, 17);
        assert_eq!(snapshot.lines_removed, 4);
        assert!(snapshot.should_create_branch);
        assert!(snapshot.scan_error.is_none());
        assert!(snapshot.suggested_branch_name.starts_with("experiment/"));
    }

    #[tokio::test]
    async fn test_detect_minimal_change_below_threshold() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.ok("git status", " M a.txt\0");
        gateway.ok("git diff HEAD --numstat", "2\t1\ta.txt\n");
        let handle = handle(gateway.clone(), ProjectSettings::default());

        let snapshot = ChangeDetector.detect(&handle, Priority::Medium).await;
        assert_eq!(snapshot.file_count(), 1);
        assert_eq!(snapshot.total_lines(), 3);
        assert!(!snapshot.should_create_branch);
        // No untracked files, no wc query
        assert_eq!(gateway.count("wc -l"), 0);
    }

    #[tokio::test]
    async fn test_detect_unborn_head_uses_index() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.ok("git status", "A  a.txt\0A  b.txt\0");
        gateway.fail("git diff HEAD", "fatal: bad revision 'HEAD'");
        gateway.ok("git diff --cached --numstat", "5\t0\ta.txt\n1\t0\tb.txt\n");
        let handle = handle(gateway.clone(), ProjectSettings::default());

        let snapshot = ChangeDetector.detect(&handle, Priority::Medium).await;
        assert_eq!(snapshot.lines_added, 6);
        assert!(snapshot.should_create_branch);
    }

    #[tokio::test]
    async fn test_detect_path_resembling_push_error() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.ok("git status", " M docs/non-fast-forward.md\0 M src/lib.rs\0");
        gateway.ok(
            "git diff HEAD --numstat",
            "3\t0\tdocs/non-fast-forward.md\n1\t1\tsrc/lib.rs\n",
        );
        let handle = handle(gateway.clone(), ProjectSettings::default());

        let snapshot = ChangeDetector.detect(&handle, Priority::Medium).await;
        assert!(snapshot.scan_error.is_none());
        assert_eq!(snapshot.file_count(), 2);
        assert!(snapshot.should_create_branch);
        assert_eq!(handle.throttler().stats().failure_count, 0);
    }

    #[tokio::test]
    async fn test_detect_scan_failure() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail("git status", "fatal: not a git repository");
        let handle = handle(gateway.clone(), ProjectSettings::default());

        let snapshot = ChangeDetector.detect(&handle, Priority::Medium).await;
        assert!(snapshot.is_empty());
        assert!(!snapshot.should_create_branch);
        assert!(snapshot.scan_error.unwrap().contains("not a git repository"));
    }

    #[tokio::test]
    async fn test_detect_clean_tree() {
        let gateway = Arc::new(ScriptedGateway::new());
        let handle = handle(gateway.clone(), ProjectSettings::default());

        let snapshot = ChangeDetector.detect(&handle, Priority::Low).await;
        assert!(snapshot.is_empty());
        assert!(!snapshot.should_create_branch);
        assert_eq!(gateway.count("numstat"), 0);
    }
}
