//! Test doubles shared by the unit tests

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::config::{CommitIdentity, ThrottleConfig};
use crate::gateway::CommandGateway;
use crate::project::{Project, ProjectHandle, ProjectId, ProjectSettings};
use crate::{Error, Result};

/// Canned reply for a matching command
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Ok(String),
    Fail(String),
}

#[derive(Debug)]
struct Rule {
    needle: String,
    reply: Reply,
    remaining: Option<usize>,
}

/// Gateway that answers from a rule list and records every command
///
/// Rules are matched newest first by substring; one-shot rules are consumed.
/// Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub(crate) struct ScriptedGateway {
    calls: Mutex<Vec<String>>,
    rules: Mutex<Vec<Rule>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block every command until the semaphore hands out a permit
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn ok(&self, needle: &str, output: &str) -> &Self {
        self.push(needle, Reply::Ok(output.to_string()), None)
    }

    pub fn fail(&self, needle: &str, output: &str) -> &Self {
        self.push(needle, Reply::Fail(output.to_string()), None)
    }

    pub fn ok_once(&self, needle: &str, output: &str) -> &Self {
        self.push(needle, Reply::Ok(output.to_string()), Some(1))
    }

    pub fn fail_once(&self, needle: &str, output: &str) -> &Self {
        self.push(needle, Reply::Fail(output.to_string()), Some(1))
    }

    fn push(&self, needle: &str, reply: Reply, remaining: Option<usize>) -> &Self {
        self.rules.lock().push(Rule {
            needle: needle.to_string(),
            reply,
            remaining,
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.contains(needle)).count()
    }

    fn answer(&self, command: &str) -> Reply {
        let mut rules = self.rules.lock();
        let hit = rules
            .iter()
            .rposition(|r| command.contains(&r.needle) && r.remaining != Some(0));

        match hit {
            Some(idx) => {
                let rule = &mut rules[idx];
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                rule.reply.clone()
            }
            None => Reply::Ok(String::new()),
        }
    }
}

#[async_trait]
impl CommandGateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn execute(&self, _workdir: &Path, command: &str) -> Result<String> {
        self.calls.lock().push(command.to_string());

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        match self.answer(command) {
            Reply::Ok(out) => Ok(out),
            Reply::Fail(out) => Err(Error::CommandFailed {
                command: command.to_string(),
                output: out,
            }),
        }
    }
}

pub(crate) fn identity() -> CommitIdentity {
    CommitIdentity {
        name: "Waypoint Test".to_string(),
        email: "test@example.com".to_string(),
    }
}

/// Throttle settings with no retry delay to keep tests fast
pub(crate) fn fast_throttle() -> ThrottleConfig {
    ThrottleConfig {
        retry_delay: std::time::Duration::from_millis(1),
        max_retries: 0,
        ..ThrottleConfig::default()
    }
}

pub(crate) fn project() -> Project {
    Project::new(
        ProjectId::new("demo"),
        PathBuf::from("/tmp/waypoint-demo"),
        "main",
    )
}

pub(crate) fn handle(gateway: Arc<ScriptedGateway>, settings: ProjectSettings) -> Arc<ProjectHandle> {
    Arc::new(ProjectHandle::new(project(), settings, gateway, fast_throttle()))
}
