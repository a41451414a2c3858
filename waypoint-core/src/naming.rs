//! Branch naming
//!
//! Two families of names are produced:
//!
//! - checkpoint branches: `<type>/<YYYYMMDDTHHMMSSZ>`, suffixed `-2`, `-3`,
//!   ... on collision
//! - conversation steps: `conv-<id>-step-<N>`, each step parented on the
//!   previous one and step 1 on the default branch

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git::command;
use crate::git::status::non_empty_lines;
use crate::project::ProjectHandle;
use crate::throttle::Priority;
use crate::{Error, Result};

/// Kind of branch a checkpoint lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    Feature,
    Bugfix,
    Experiment,
    Iteration,
    Checkpoint,
    /// Step of a conversation chain
    Step,
}

impl BranchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchType::Feature => "feature",
            BranchType::Bugfix => "bugfix",
            BranchType::Experiment => "experiment",
            BranchType::Iteration => "iteration",
            BranchType::Checkpoint => "checkpoint",
            BranchType::Step => "step",
        }
    }
}

impl std::fmt::Display for BranchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BranchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "feature" => Ok(BranchType::Feature),
            "bugfix" => Ok(BranchType::Bugfix),
            "experiment" => Ok(BranchType::Experiment),
            "iteration" => Ok(BranchType::Iteration),
            "checkpoint" => Ok(BranchType::Checkpoint),
            "step" => Ok(BranchType::Step),
            other => Err(Error::Config(format!(
                "Unknown branch type '{}'. Valid types: feature, bugfix, experiment, iteration, checkpoint, step",
                other
            ))),
        }
    }
}

/// A resolved, currently unused branch name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchName {
    pub name: String,
    pub branch_type: BranchType,
    /// Branch this one continues from, when that is recorded
    pub parent: Option<String>,
}

/// Restrict a conversation id to `[A-Za-z0-9_-]`
pub fn sanitize_conversation_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "anon".to_string()
    } else {
        cleaned.to_string()
    }
}

fn step_prefix(conversation: &str) -> String {
    format!("conv-{}-step-", conversation)
}

/// Step number of `branch` within `conversation`, if it is one of its steps
fn step_number(branch: &str, conversation: &str) -> Option<u32> {
    branch
        .strip_prefix(&step_prefix(conversation))
        .and_then(|n| n.parse().ok())
}

/// Pick a name that is not in `existing`
///
/// With a conversation id the step family is used and `branch_type` is
/// recorded as [`BranchType::Step`].
pub fn resolve_name(
    existing: &HashSet<String>,
    branch_type: BranchType,
    now: DateTime<Utc>,
    conversation_id: Option<&str>,
    default_branch: &str,
) -> BranchName {
    match conversation_id {
        Some(id) => {
            let conversation = sanitize_conversation_id(id);
            let highest = existing
                .iter()
                .filter_map(|b| step_number(b, &conversation))
                .max()
                .unwrap_or(0);

            let mut step = u64::from(highest) + 1;
            while existing.contains(&format!("{}{}", step_prefix(&conversation), step)) {
                step += 1;
            }

            let parent = if step == 1 {
                default_branch.to_string()
            } else {
                format!("{}{}", step_prefix(&conversation), step - 1)
            };

            BranchName {
                name: format!("{}{}", step_prefix(&conversation), step),
                branch_type: BranchType::Step,
                parent: Some(parent),
            }
        }
        None => {
            let base = format!("{}/{}", branch_type, now.format("%Y%m%dT%H%M%SZ"));
            let mut name = base.clone();
            let mut suffix = 2;
            while existing.contains(&name) {
                name = format!("{}-{}", base, suffix);
                suffix += 1;
            }

            BranchName {
                name,
                branch_type,
                parent: None,
            }
        }
    }
}

/// Produces unique branch names for a project
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchNamer;

impl BranchNamer {
    /// Resolve a name against the project's current branches
    ///
    /// Must be called under the project lock for the name to stay unique
    /// until the branch is created.
    pub async fn name(
        &self,
        handle: &ProjectHandle,
        branch_type: BranchType,
        now: DateTime<Utc>,
        conversation_id: Option<&str>,
        priority: Priority,
    ) -> Result<BranchName> {
        let output = handle.run(command::list_branches(), priority).await?;
        let existing: HashSet<String> = non_empty_lines(&output).into_iter().collect();

        let name = resolve_name(
            &existing,
            branch_type,
            now,
            conversation_id,
            &handle.project().default_branch,
        );
        tracing::debug!(
            project = %handle.id(),
            branch = %name.name,
            parent = ?name.parent,
            existing = existing.len(),
            "Resolved branch name"
        );
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectSettings;
    use crate::testing::{handle, ScriptedGateway};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap()
    }

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_checkpoint_name() {
        let name = resolve_name(&set(&["main"]), BranchType::Feature, at(), None, "main");
        assert_eq!(name.name, "feature/20260304T050607Z");
        assert_eq!(name.branch_type, BranchType::Feature);
        assert!(name.parent.is_none());
    }

    #[test]
    fn test_checkpoint_name_collision() {
        let existing = set(&["experiment/20260304T050607Z", "experiment/20260304T050607Z-2"]);
        let name = resolve_name(&existing, BranchType::Experiment, at(), None, "main");
        assert_eq!(name.name, "experiment/20260304T050607Z-3");
    }

    #[test]
    fn test_step_chain() {
        let existing = set(&["main", "conv-X-step-1", "conv-X-step-2", "conv-X-step-3", "conv-Y-step-7"]);
        let name = resolve_name(&existing, BranchType::Feature, at(), Some("X"), "main");
        assert_eq!(name.name, "conv-X-step-4");
        assert_eq!(name.parent.as_deref(), Some("conv-X-step-3"));
        assert_eq!(name.branch_type, BranchType::Step);
    }

    #[test]
    fn test_first_step_parents_default_branch() {
        let name = resolve_name(&set(&["trunk"]), BranchType::Feature, at(), Some("abc"), "trunk");
        assert_eq!(name.name, "conv-abc-step-1");
        assert_eq!(name.parent.as_deref(), Some("trunk"));
    }

    #[test]
    fn test_step_numbers_do_not_leak_between_prefixes() {
        let existing = set(&["conv-X-step-2", "conv-X-step-x", "conv-XY-step-9"]);
        let name = resolve_name(&existing, BranchType::Step, at(), Some("X"), "main");
        assert_eq!(name.name, "conv-X-step-3");
    }

    #[test]
    fn test_step_after_largest_number() {
        let existing = set(&["conv-X-step-4294967295"]);
        let name = resolve_name(&existing, BranchType::Step, at(), Some("X"), "main");
        assert_eq!(name.name, "conv-X-step-4294967296");
        assert_eq!(name.parent.as_deref(), Some("conv-X-step-4294967295"));
    }

    #[test]
    fn test_sanitize_conversation_id() {
        assert_eq!(sanitize_conversation_id("a b/c"), "a-b-c");
        assert_eq!(sanitize_conversation_id("ok_id-1"), "ok_id-1");
        assert_eq!(sanitize_conversation_id("///"), "anon");
    }

    #[test]
    fn test_branch_type_parse() {
        assert_eq!("Bugfix".parse::<BranchType>().unwrap(), BranchType::Bugfix);
        assert!("nope".parse::<BranchType>().is_err());
    }

    #[tokio::test]
    async fn test_namer_queries_branches() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.ok("git branch --list", "main\nconv-c1-step-1\n");
        let handle = handle(gateway.clone(), ProjectSettings::default());

        let name = BranchNamer
            .name(&handle, BranchType::Feature, at(), Some("c1"), Priority::High)
            .await
            .unwrap();
        assert_eq!(name.name, "conv-c1-step-2");
        assert_eq!(gateway.count("git branch --list"), 1);
    }
}
