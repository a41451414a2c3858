//! Configuration management for Waypoint
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (WAYPOINT_*)
//! 3. Config file (~/.config/waypoint/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::project::ProjectSettings;
use crate::{Error, Result};

/// Command throttler limits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Commands allowed to run at the same time per project
    pub max_concurrent_commands: usize,

    /// Commands allowed to wait in the queue per project
    pub max_queue_size: usize,

    /// How long a command may wait in the queue before it is failed
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Consecutive failures that open the circuit breaker
    pub circuit_breaker_threshold: u32,

    /// How long the breaker stays open before letting a command through
    #[serde(with = "humantime_serde")]
    pub circuit_breaker_cooldown: Duration,

    /// Base delay between retries; attempt N waits N times this
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Retries for commands submitted without an explicit retry count
    pub max_retries: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent_commands: 5,
            max_queue_size: 50,
            command_timeout: Duration::from_secs(30),
            circuit_breaker_threshold: 10,
            circuit_breaker_cooldown: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
            max_retries: 2,
        }
    }
}

impl ThrottleConfig {
    /// Reject limits the throttler cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_commands == 0 {
            return Err(Error::Config(
                "throttle.max_concurrent_commands must be at least 1".to_string(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(Error::Config(
                "throttle.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(Error::Config(
                "throttle.circuit_breaker_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Author/committer used for automatic commits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

/// Commit message generation settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MessageConfig {
    /// External command that reads a diff summary on stdin and prints a message
    pub command: Option<String>,

    /// How long to wait for the generator before using the template
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Background auto-checkpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Time between automatic checkpoint attempts
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Push each automatic checkpoint when the project has a remote enabled
    pub push: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            push: true,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Command throttler configuration
    pub throttle: ThrottleConfig,

    /// Committer identity; required for checkpoints
    pub identity: Option<CommitIdentity>,

    /// Commit message generation
    pub message: MessageConfig,

    /// Defaults for newly registered projects
    pub project: ProjectSettings,

    /// Timer-driven checkpoints
    pub watch: WatchConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if let Some(path) = config_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.throttle.validate()?;
        Ok(config)
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/waypoint/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("waypoint").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - WAYPOINT_COMMITTER_NAME / WAYPOINT_COMMITTER_EMAIL: committer identity
    /// - WAYPOINT_MESSAGE_COMMAND: commit message generator command
    /// - WAYPOINT_MAX_CONCURRENT: concurrent command limit
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        self.identity = merge_identity(
            self.identity.take(),
            var("WAYPOINT_COMMITTER_NAME"),
            var("WAYPOINT_COMMITTER_EMAIL"),
        );

        if let Some(command) = var("WAYPOINT_MESSAGE_COMMAND") {
            self.message.command = Some(command);
        }

        if let Some(max) = var("WAYPOINT_MAX_CONCURRENT").and_then(|v| v.parse().ok()) {
            self.throttle.max_concurrent_commands = max;
        }

        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(
        mut self,
        committer_name: Option<String>,
        committer_email: Option<String>,
        message_command: Option<String>,
    ) -> Self {
        self.identity = merge_identity(self.identity.take(), committer_name, committer_email);

        if let Some(command) = message_command {
            self.message.command = Some(command);
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(
        config_path: Option<&Path>,
        committer_name: Option<String>,
        committer_email: Option<String>,
        message_command: Option<String>,
    ) -> Result<Self> {
        let base = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };
        let config = base
            .with_env_overrides()
            .with_cli_overrides(committer_name, committer_email, message_command);
        config.throttle.validate()?;
        Ok(config)
    }
}

/// Override the parts of an identity that were given
///
/// A brand-new identity needs both halves; a lone name or email without an
/// existing identity is ignored.
fn merge_identity(
    current: Option<CommitIdentity>,
    name: Option<String>,
    email: Option<String>,
) -> Option<CommitIdentity> {
    match (current, name, email) {
        (Some(mut id), name, email) => {
            if let Some(n) = name {
                id.name = n;
            }
            if let Some(e) = email {
                id.email = e;
            }
            Some(id)
        }
        (None, Some(name), Some(email)) => Some(CommitIdentity { name, email }),
        (None, _, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.throttle.max_concurrent_commands, 5);
        assert_eq!(config.throttle.max_queue_size, 50);
        assert_eq!(config.throttle.command_timeout, Duration::from_secs(30));
        assert_eq!(config.throttle.circuit_breaker_threshold, 10);
        assert_eq!(config.throttle.circuit_breaker_cooldown, Duration::from_secs(30));
        assert!(config.identity.is_none());
        assert_eq!(config.project.min_changed_files_threshold, 2);
        assert_eq!(config.project.min_changed_lines_threshold, 50);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[throttle]
max_concurrent_commands = 2
command_timeout = "5s"
circuit_breaker_cooldown = "1m"

[identity]
name = "Waypoint Bot"
email = "bot@example.com"

[message]
command = "llm -s 'write a commit message'"
timeout = "3s"

[project]
min_changed_files_threshold = 4
sync_branch_patterns = ["conv-*", "feature/*"]
remote_enabled = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.throttle.max_concurrent_commands, 2);
        assert_eq!(config.throttle.command_timeout, Duration::from_secs(5));
        assert_eq!(config.throttle.circuit_breaker_cooldown, Duration::from_secs(60));
        // Unset keys keep their defaults
        assert_eq!(config.throttle.max_queue_size, 50);
        assert_eq!(config.identity.unwrap().name, "Waypoint Bot");
        assert_eq!(config.message.timeout, Duration::from_secs(3));
        assert_eq!(config.project.min_changed_files_threshold, 4);
        assert_eq!(config.project.min_changed_lines_threshold, 50);
        assert_eq!(config.project.sync_branch_patterns.len(), 2);
        assert!(config.project.remote_enabled);
    }

    #[test]
    fn test_load_from_file_rejects_zero_concurrency() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[throttle]\nmax_concurrent_commands = 0\n").unwrap();

        let result = Config::load_from_file(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WAYPOINT_COMMITTER_NAME", "Env Name"),
            ("WAYPOINT_COMMITTER_EMAIL", "env@example.com"),
            ("WAYPOINT_MAX_CONCURRENT", "3"),
        ]
        .into_iter()
        .collect();

        let config =
            Config::default().with_overrides_from(|k| vars.get(k).map(|v| v.to_string()));
        let identity = config.identity.unwrap();
        assert_eq!(identity.name, "Env Name");
        assert_eq!(identity.email, "env@example.com");
        assert_eq!(config.throttle.max_concurrent_commands, 3);
    }

    #[test]
    fn test_cli_overrides_partial_identity() {
        let mut config = Config::default();
        config.identity = Some(CommitIdentity {
            name: "File".to_string(),
            email: "file@example.com".to_string(),
        });

        let config = config.with_cli_overrides(Some("Cli".to_string()), None, None);
        let identity = config.identity.unwrap();
        assert_eq!(identity.name, "Cli");
        assert_eq!(identity.email, "file@example.com");
    }

    #[test]
    fn test_lone_name_does_not_create_identity() {
        let config = Config::default().with_cli_overrides(Some("Only".to_string()), None, None);
        assert!(config.identity.is_none());
    }
}
