//! Waypoint Core - automated git checkpointing for agent-edited working trees
//!
//! Decides when a working tree has changed enough to snapshot, commits the
//! changes on a fresh branch, pushes them, and rolls back on request, while
//! timers, hooks and user actions fire concurrently against the same
//! repository.

pub mod checkpoint;
pub mod config;
pub mod detect;
pub mod error;
pub mod events;
pub mod gateway;
pub mod git;
pub mod message;
pub mod naming;
pub mod orchestrator;
pub mod project;
pub mod push;
pub mod rollback;
pub mod store;
pub mod throttle;

#[cfg(test)]
pub(crate) mod testing;

pub use checkpoint::{
    CheckpointEngine, CheckpointOutcome, CheckpointRecord, CheckpointRequest, HistorySnapshot,
    SkipReason, Trigger,
};
pub use config::{CommitIdentity, Config, MessageConfig, ThrottleConfig, WatchConfig};
pub use detect::{ChangeDetector, ChangeSnapshot};
pub use error::{Error, Result};
pub use events::{EventBus, EventStatus, Operation, OperationEvent};
pub use gateway::{CommandGateway, ShellGateway};
pub use message::{CommandMessageGenerator, CommitMessageGenerator};
pub use naming::{BranchName, BranchNamer, BranchType};
pub use orchestrator::{AutoCheckpointer, CycleOutcome, Orchestrator};
pub use project::{Project, ProjectHandle, ProjectId, ProjectRegistry, ProjectSettings};
pub use push::{PushArbitrator, SyncJob, SyncOutcome, SyncResult, SyncSkip, SyncStatus};
pub use rollback::{RollbackEngine, RollbackOptions, RollbackRecord, RollbackState, RollbackStep};
pub use store::{MemoryStore, MetadataStore};
pub use throttle::{CommandThrottler, Priority, ThrottleStats};

#[cfg(feature = "database")]
pub use store::SqliteStore;
