//! Priority ordering for queued commands

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::Result;

/// Scheduling priority of a command
///
/// Declaration order is significance order: `Urgent` runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        };
        write!(f, "{}", s)
    }
}

/// A command to run through the throttler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottledCommand {
    pub command: String,
    pub priority: Priority,
    /// `None` uses the throttler's configured default
    pub max_retries: Option<u32>,
}

impl ThrottledCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            priority: Priority::Medium,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A command waiting for a slot
#[derive(Debug)]
pub(crate) struct Queued {
    pub command: String,
    pub priority: Priority,
    pub seq: u64,
    pub attempt: u32,
    pub max_retries: u32,
    pub enqueued_at: Instant,
    pub reply: oneshot::Sender<Result<String>>,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    /// Max-heap order: higher priority first, then lower sequence (FIFO)
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn queued(priority: Priority, seq: u64) -> Queued {
        let (tx, _rx) = oneshot::channel();
        Queued {
            command: format!("cmd-{}", seq),
            priority,
            seq,
            attempt: 0,
            max_retries: 0,
            enqueued_at: Instant::now(),
            reply: tx,
        }
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_heap_pops_by_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(queued(Priority::Low, 0));
        heap.push(queued(Priority::High, 1));
        heap.push(queued(Priority::Medium, 2));
        heap.push(queued(Priority::High, 3));
        heap.push(queued(Priority::Urgent, 4));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|q| q.seq)).collect();
        assert_eq!(order, vec![4, 1, 3, 2, 0]);
    }
}
