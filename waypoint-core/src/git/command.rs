//! Shell command lines for the git operations Waypoint performs
//!
//! Every user-controlled argument (branch names, messages, URLs) is quoted
//! with `shlex` before it is spliced into a command line.

use crate::config::CommitIdentity;
use crate::{Error, Result};

/// Quote one shell word
pub fn quote(word: &str) -> Result<String> {
    shlex::try_quote(word)
        .map(|q| q.into_owned())
        .map_err(|e| Error::Config(format!("Cannot quote argument {:?}: {}", word, e)))
}

pub fn status_porcelain() -> String {
    "git status --porcelain=v1 -z --untracked-files=all".to_string()
}

pub fn diff_numstat_head() -> String {
    "git diff HEAD --numstat".to_string()
}

pub fn diff_numstat_cached() -> String {
    "git diff --cached --numstat".to_string()
}

/// Line counts for every untracked, non-ignored file
pub fn untracked_line_counts() -> String {
    "git ls-files --others --exclude-standard -z | xargs -0 -r wc -l --".to_string()
}

pub fn diff_cached_stat() -> String {
    "git diff --cached --stat".to_string()
}

pub fn list_branches() -> String {
    "git branch --list --format='%(refname:short)'".to_string()
}

/// Name of the checked-out branch; works on an unborn HEAD, fails when detached
pub fn current_branch() -> String {
    "git symbolic-ref --short -q HEAD".to_string()
}

pub fn rev_parse_head() -> String {
    "git rev-parse HEAD".to_string()
}

pub fn rev_parse_branch(branch: &str) -> Result<String> {
    Ok(format!(
        "git rev-parse --verify -q {}",
        quote(&format!("refs/heads/{}", branch))?
    ))
}

pub fn resolve_commit(reference: &str) -> Result<String> {
    Ok(format!(
        "git rev-parse --verify -q {}",
        quote(&format!("{}^{{commit}}", reference))?
    ))
}

/// Create and switch to `name`, starting at `start` or the current HEAD
///
/// Uncommitted changes are carried over; git refuses if they would conflict
/// with `start`.
pub fn checkout_new_branch(name: &str, start: Option<&str>) -> Result<String> {
    let mut cmd = format!("git checkout -q -b {}", quote(name)?);
    if let Some(start) = start {
        cmd.push(' ');
        cmd.push_str(&quote(start)?);
    }
    Ok(cmd)
}

pub fn checkout(name: &str) -> Result<String> {
    Ok(format!("git checkout -q {}", quote(name)?))
}

pub fn delete_branch(name: &str) -> Result<String> {
    Ok(format!("git branch -D {}", quote(name)?))
}

pub fn create_branch_at(name: &str, commit: &str) -> Result<String> {
    Ok(format!("git branch {} {}", quote(name)?, quote(commit)?))
}

pub fn track_remote_branch(name: &str, remote: &str) -> Result<String> {
    Ok(format!(
        "git branch --track {} {}",
        quote(name)?,
        quote(&format!("{}/{}", remote, name))?
    ))
}

pub fn add_all() -> String {
    "git add -A".to_string()
}

pub fn unstage_all() -> String {
    "git reset -q".to_string()
}

pub fn commit(identity: &CommitIdentity, message: &str, allow_empty: bool) -> Result<String> {
    let mut cmd = format!(
        "git -c {} -c {} commit -q",
        quote(&format!("user.name={}", identity.name))?,
        quote(&format!("user.email={}", identity.email))?
    );
    if allow_empty {
        cmd.push_str(" --allow-empty");
    }
    cmd.push_str(" -m ");
    cmd.push_str(&quote(message)?);
    Ok(cmd)
}

pub fn list_remotes() -> String {
    "git remote".to_string()
}

pub fn add_remote(name: &str, url: &str) -> Result<String> {
    Ok(format!("git remote add {} {}", quote(name)?, quote(url)?))
}

/// Files touched by a single commit (root commits included)
pub fn commit_files(commit: &str) -> Result<String> {
    Ok(format!(
        "git diff-tree --root --no-commit-id --name-only -r {}",
        quote(commit)?
    ))
}

pub fn fetch(remote: &str, branch: &str) -> Result<String> {
    Ok(format!("git fetch -q {} {}", quote(remote)?, quote(branch)?))
}

/// `<commit>:refs/heads/<branch>`, so the remote gets exactly `commit`
fn pinned_refspec(branch: &str, commit: &str) -> Result<String> {
    quote(&format!("{}:refs/heads/{}", commit, branch))
}

pub fn push(remote: &str, branch: &str, commit: &str) -> Result<String> {
    Ok(format!(
        "git push {} {}",
        quote(remote)?,
        pinned_refspec(branch, commit)?
    ))
}

pub fn push_set_upstream(remote: &str, branch: &str, commit: &str) -> Result<String> {
    Ok(format!(
        "git push --set-upstream {} {}",
        quote(remote)?,
        pinned_refspec(branch, commit)?
    ))
}

pub fn push_force_with_lease(remote: &str, branch: &str, commit: &str) -> Result<String> {
    Ok(format!(
        "git push {} {} {}",
        quote(&format!("--force-with-lease={}", branch))?,
        quote(remote)?,
        pinned_refspec(branch, commit)?
    ))
}

pub fn stash_push(message: &str) -> Result<String> {
    Ok(format!(
        "git stash push --include-untracked -m {}",
        quote(message)?
    ))
}

pub fn stash_pop() -> String {
    "git stash pop -q".to_string()
}

pub fn reset_hard(commit: &str) -> Result<String> {
    Ok(format!("git reset -q --hard {}", quote(commit)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> CommitIdentity {
        CommitIdentity {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
        }
    }

    fn words(cmd: &str) -> Vec<String> {
        shlex::split(cmd).unwrap()
    }

    #[test]
    fn test_plain_names_stay_unquoted() {
        assert_eq!(
            checkout_new_branch("feature/20260101T000000Z", None).unwrap(),
            "git checkout -q -b feature/20260101T000000Z"
        );
        assert_eq!(
            checkout_new_branch("conv-c1-step-2", Some("conv-c1-step-1")).unwrap(),
            "git checkout -q -b conv-c1-step-2 conv-c1-step-1"
        );
    }

    #[test]
    fn test_commit_quotes_message_and_identity() {
        let cmd = commit(&identity(), "Auto-commit: 2 files changed", false).unwrap();
        assert_eq!(
            words(&cmd),
            vec![
                "git",
                "-c",
                "user.name=Ada Lovelace",
                "-c",
                "user.email=ada@example.com",
                "commit",
                "-q",
                "-m",
                "Auto-commit: 2 files changed"
            ]
        );
    }

    #[test]
    fn test_commit_allow_empty() {
        let cmd = commit(&identity(), "msg", true).unwrap();
        assert!(words(&cmd).contains(&"--allow-empty".to_string()));
    }

    #[test]
    fn test_hostile_message_is_one_word() {
        let cmd = commit(&identity(), "x'; rm -rf / #", false).unwrap();
        assert_eq!(words(&cmd).last().unwrap(), "x'; rm -rf / #");
    }

    #[test]
    fn test_resolve_commit_peels() {
        let cmd = resolve_commit("main").unwrap();
        assert_eq!(words(&cmd).last().unwrap(), "main^{commit}");
    }

    #[test]
    fn test_force_with_lease_names_branch() {
        let cmd = push_force_with_lease("origin", "conv-a-step-2", "abc1234").unwrap();
        assert_eq!(
            words(&cmd),
            vec![
                "git",
                "push",
                "--force-with-lease=conv-a-step-2",
                "origin",
                "abc1234:refs/heads/conv-a-step-2"
            ]
        );
    }

    #[test]
    fn test_push_pins_commit() {
        assert_eq!(
            push("origin", "feature/x", "abc1234").unwrap(),
            "git push origin abc1234:refs/heads/feature/x"
        );
        assert_eq!(
            words(&push_set_upstream("origin", "feature/x", "abc1234").unwrap()),
            vec![
                "git",
                "push",
                "--set-upstream",
                "origin",
                "abc1234:refs/heads/feature/x"
            ]
        );
    }

    #[test]
    fn test_quote_rejects_nul() {
        assert!(quote("a\0b").is_err());
    }
}
