//! Git plumbing for Waypoint
//!
//! This module provides repository discovery, the command lines Waypoint
//! submits to the gateway, and parsers for their output.

pub mod command;
mod repo;
pub mod status;

pub use repo::{init, inspect, is_git_repo, RemoteInfo, RepoInfo};
pub use status::{ChangeKind, ChangedFile, LineCounts};
