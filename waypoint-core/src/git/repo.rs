//! Repository discovery through libgit2
//!
//! Only used when a project is registered: to find the working tree root,
//! the default branch, and the configured remotes. Everything that touches
//! the working tree afterwards goes through the throttled gateway.

use std::path::{Path, PathBuf};

use git2::Repository;

use crate::{Error, Result};

/// Information about a git remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Name of the remote (e.g., "origin")
    pub name: String,
    /// URL of the remote
    pub url: String,
}

/// What libgit2 could learn about a repository at registration time
#[derive(Debug, Clone)]
pub struct RepoInfo {
    /// Working tree root
    pub root: PathBuf,
    /// Default branch name (main or master)
    pub default_branch: String,
    /// Configured remotes
    pub remotes: Vec<RemoteInfo>,
    /// Whether HEAD points at a commit yet
    pub has_commits: bool,
}

/// Check if the given path is inside a git repository
pub fn is_git_repo(path: impl AsRef<Path>) -> bool {
    Repository::discover(path.as_ref()).is_ok()
}

/// Inspect the repository containing `path`
///
/// This will search upward from the given path to find the repository root.
pub fn inspect(path: impl AsRef<Path>) -> Result<RepoInfo> {
    let path = path.as_ref();

    let repo = Repository::discover(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            Error::Config(format!(
                "Not a git repository: {}. Run 'waypoint init' first.",
                path.display()
            ))
        } else {
            Error::Git(e.message().to_string())
        }
    })?;

    let root = repo
        .workdir()
        .ok_or_else(|| Error::Config("Bare repositories are not supported".to_string()))?
        .to_path_buf();

    let has_commits = match repo.head() {
        Ok(head) => head.peel_to_commit().is_ok(),
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => false,
        Err(e) => return Err(e.into()),
    };

    Ok(RepoInfo {
        root,
        default_branch: default_branch(&repo),
        remotes: list_remotes(&repo)?,
        has_commits,
    })
}

/// Get the default branch name
///
/// Prefers the remote's main/master, then local main/master, then whatever
/// unborn HEAD points at, then "main".
fn default_branch(repo: &Repository) -> String {
    for candidate in [
        ("refs/remotes/origin/main", "main"),
        ("refs/remotes/origin/master", "master"),
        ("refs/heads/main", "main"),
        ("refs/heads/master", "master"),
    ] {
        if repo.find_reference(candidate.0).is_ok() {
            return candidate.1.to_string();
        }
    }

    // Fresh repository: HEAD is symbolic to an unborn branch
    if let Ok(head) = repo.find_reference("HEAD") {
        if let Some(target) = head.symbolic_target() {
            if let Some(name) = target.strip_prefix("refs/heads/") {
                return name.to_string();
            }
        }
    }

    "main".to_string()
}

fn list_remotes(repo: &Repository) -> Result<Vec<RemoteInfo>> {
    let remotes = repo.remotes()?;

    let mut result = Vec::new();
    for remote_name in remotes.iter().flatten() {
        if let Ok(remote) = repo.find_remote(remote_name) {
            if let Some(url) = remote.url() {
                result.push(RemoteInfo {
                    name: remote_name.to_string(),
                    url: url.to_string(),
                });
            }
        }
    }

    Ok(result)
}

/// Create a new repository at `path` with `initial_branch` checked out
pub fn init(path: impl AsRef<Path>, initial_branch: &str) -> Result<RepoInfo> {
    let path = path.as_ref();
    std::fs::create_dir_all(path)?;

    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head(initial_branch);
    Repository::init_opts(path, &opts)?;

    inspect(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_git_repo_negative() {
        let dir = TempDir::new().unwrap();
        assert!(!is_git_repo(dir.path()));
    }

    #[test]
    fn test_inspect_non_git_dir() {
        let dir = TempDir::new().unwrap();
        let result = inspect(dir.path());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_init_fresh_repo() {
        let dir = TempDir::new().unwrap();
        let info = init(dir.path(), "trunk").unwrap();

        assert!(is_git_repo(dir.path()));
        assert_eq!(info.default_branch, "trunk");
        assert!(!info.has_commits);
        assert!(info.remotes.is_empty());
    }

    #[test]
    fn test_inspect_finds_remote() {
        let dir = TempDir::new().unwrap();
        init(dir.path(), "main").unwrap();
        let repo = Repository::open(dir.path()).unwrap();
        repo.remote("origin", "https://example.com/o/r.git").unwrap();

        let info = inspect(dir.path()).unwrap();
        assert_eq!(
            info.remotes,
            vec![RemoteInfo {
                name: "origin".to_string(),
                url: "https://example.com/o/r.git".to_string()
            }]
        );
    }
}
