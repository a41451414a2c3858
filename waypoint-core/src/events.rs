//! Operation events
//!
//! One event is emitted per checkpoint, push and rollback. Events are
//! logged under the `waypoint::events` target and fanned out to every
//! subscriber of the [`EventBus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::project::ProjectId;
use crate::{Error, Result};

/// Events kept for slow subscribers before they start lagging
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Checkpoint,
    Push,
    Rollback,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Checkpoint => "checkpoint",
            Operation::Push => "push",
            Operation::Rollback => "rollback",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "checkpoint" => Ok(Operation::Checkpoint),
            "push" => Ok(Operation::Push),
            "rollback" => Ok(Operation::Rollback),
            other => Err(Error::Store(format!("Unknown operation '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Succeeded,
    Skipped,
    Failed,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventStatus::Succeeded => "succeeded",
            EventStatus::Skipped => "skipped",
            EventStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "succeeded" => Ok(EventStatus::Succeeded),
            "skipped" => Ok(EventStatus::Skipped),
            "failed" => Ok(EventStatus::Failed),
            other => Err(Error::Store(format!("Unknown event status '{}'", other))),
        }
    }
}

/// Outcome of one orchestrated operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationEvent {
    pub operation: Operation,
    pub project_id: ProjectId,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub status: EventStatus,
    /// Skip reason or error text
    pub detail: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl OperationEvent {
    pub fn new(operation: Operation, project_id: ProjectId, status: EventStatus) -> Self {
        Self {
            operation,
            project_id,
            branch: None,
            commit_hash: None,
            status,
            detail: None,
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_commit(mut self, hash: impl Into<String>) -> Self {
        self.commit_hash = Some(hash.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Broadcast channel for operation events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OperationEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.tx.subscribe()
    }

    /// Log the event and hand it to current subscribers
    pub fn emit(&self, event: OperationEvent) {
        tracing::info!(
            target: "waypoint::events",
            operation = %event.operation,
            project = %event.project_id,
            branch = event.branch.as_deref().unwrap_or(""),
            commit = event.commit_hash.as_deref().unwrap_or(""),
            status = %event.status,
            detail = event.detail.as_deref().unwrap_or(""),
            duration_ms = event.duration_ms,
            "Operation finished"
        );
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(
            OperationEvent::new(Operation::Push, ProjectId::new("p"), EventStatus::Succeeded)
                .with_branch("feature/x")
                .with_commit("abc"),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.operation, Operation::Push);
        assert_eq!(event.branch.as_deref(), Some("feature/x"));
        assert_eq!(event.commit_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(OperationEvent::new(
            Operation::Rollback,
            ProjectId::new("p"),
            EventStatus::Failed,
        ));
    }

    #[test]
    fn test_event_serializes_lowercase() {
        let event = OperationEvent::new(Operation::Checkpoint, ProjectId::new("p"), EventStatus::Skipped);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"operation\":\"checkpoint\""));
        assert!(json.contains("\"status\":\"skipped\""));
    }

    #[test]
    fn test_names_parse_back() {
        for op in [Operation::Checkpoint, Operation::Push, Operation::Rollback] {
            assert_eq!(op.to_string().parse::<Operation>().unwrap(), op);
        }
        for status in [EventStatus::Succeeded, EventStatus::Skipped, EventStatus::Failed] {
            assert_eq!(status.to_string().parse::<EventStatus>().unwrap(), status);
        }
        assert!("merge".parse::<Operation>().is_err());
    }
}
