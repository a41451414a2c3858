//! Command throttling for a single project
//!
//! Every gateway call a project makes is submitted here. The throttler
//! caps how many commands run at once, queues the rest by priority,
//! retries failed commands with linear backoff and trips a circuit breaker
//! when the gateway keeps failing.
//!
//! Command lifecycle:
//!
//! ```text
//! queued -> running -> succeeded
//!                   -> retrying -> queued
//!                   -> failed
//! ```

mod breaker;
mod queue;

use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::ThrottleConfig;
use crate::gateway::{detect_failure, CommandGateway};
use crate::{Error, Result};

pub use breaker::{BreakerState, CircuitBreaker};
pub use queue::{Priority, ThrottledCommand};

use queue::Queued;

/// Point-in-time view of a throttler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThrottleStats {
    pub queued: usize,
    pub running: usize,
    pub retrying: usize,
    pub breaker: BreakerState,
    pub failure_count: u32,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
}

#[derive(Debug)]
struct State {
    queue: BinaryHeap<Queued>,
    running: usize,
    retrying: usize,
    next_seq: u64,
    breaker: CircuitBreaker,
    succeeded: u64,
    failed: u64,
    rejected: u64,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

struct Shared {
    workdir: PathBuf,
    gateway: Arc<dyn CommandGateway>,
    config: ThrottleConfig,
    state: Mutex<State>,
}

/// Priority queue + concurrency cap + circuit breaker around a gateway
///
/// Cloning is cheap and every clone shares the same queue and breaker.
#[derive(Clone)]
pub struct CommandThrottler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CommandThrottler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandThrottler")
            .field("workdir", &self.shared.workdir)
            .field("gateway", &self.shared.gateway.name())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl CommandThrottler {
    pub fn new(
        workdir: impl Into<PathBuf>,
        gateway: Arc<dyn CommandGateway>,
        config: ThrottleConfig,
    ) -> Self {
        let breaker =
            CircuitBreaker::new(config.circuit_breaker_threshold, config.circuit_breaker_cooldown);
        Self {
            shared: Arc::new(Shared {
                workdir: workdir.into(),
                gateway,
                config,
                state: Mutex::new(State {
                    queue: BinaryHeap::new(),
                    running: 0,
                    retrying: 0,
                    next_seq: 0,
                    breaker,
                    succeeded: 0,
                    failed: 0,
                    rejected: 0,
                }),
            }),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.shared.workdir
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> ThrottleStats {
        let state = self.shared.state.lock();
        ThrottleStats {
            queued: state.queue.len(),
            running: state.running,
            retrying: state.retrying,
            breaker: state.breaker.state(),
            failure_count: state.breaker.failure_count(),
            succeeded: state.succeeded,
            failed: state.failed,
            rejected: state.rejected,
        }
    }

    /// Run `command` with default priority and retries
    pub async fn run(&self, command: impl Into<String>) -> Result<String> {
        self.submit(ThrottledCommand::new(command)).await
    }

    /// Queue a command and wait for its result
    ///
    /// Fails immediately with `CircuitOpen` or `QueueFull`; fails with
    /// `QueueTimeout` if the command never got a slot within the command
    /// timeout. Dropping the returned future withdraws a queued command.
    pub async fn submit(&self, command: ThrottledCommand) -> Result<String> {
        let label = command.command.clone();
        let (tx, mut rx) = oneshot::channel();

        {
            let mut state = self.shared.state.lock();
            if let Err(e) = state.breaker.check(Instant::now()) {
                state.rejected += 1;
                return Err(e);
            }
            if state.queue.len() >= self.shared.config.max_queue_size {
                state.rejected += 1;
                tracing::warn!(command = %label, capacity = self.shared.config.max_queue_size, "Command queue full");
                return Err(Error::QueueFull {
                    capacity: self.shared.config.max_queue_size,
                });
            }

            let seq = state.next_seq();
            tracing::debug!(command = %label, priority = %command.priority, seq, "Command queued");
            state.queue.push(Queued {
                command: command.command,
                priority: command.priority,
                seq,
                attempt: 0,
                max_retries: command
                    .max_retries
                    .unwrap_or(self.shared.config.max_retries),
                enqueued_at: Instant::now(),
                reply: tx,
            });
        }

        self.pump();

        loop {
            tokio::select! {
                result = &mut rx => {
                    return result.unwrap_or_else(|_| Err(Error::Cancelled(label)));
                }
                _ = tokio::time::sleep(self.shared.config.command_timeout) => {
                    self.expire_stale();
                }
            }
        }
    }

    /// Fail every queued command that has waited longer than the timeout
    fn expire_stale(&self) {
        let timeout = self.shared.config.command_timeout;
        let now = Instant::now();
        let mut state = self.shared.state.lock();

        let (stale, fresh): (Vec<_>, Vec<_>) = std::mem::take(&mut state.queue)
            .into_vec()
            .into_iter()
            .partition(|q| now.duration_since(q.enqueued_at) >= timeout);
        state.queue = fresh.into();

        for q in stale {
            state.failed += 1;
            let waited = now.duration_since(q.enqueued_at);
            tracing::warn!(command = %q.command, waited_ms = waited.as_millis() as u64, "Command timed out in queue");
            let _ = q.reply.send(Err(Error::QueueTimeout {
                command: q.command,
                waited,
            }));
        }
    }

    /// Start queued commands while slots are free
    fn pump(&self) {
        let mut to_start = Vec::new();

        {
            let mut state = self.shared.state.lock();
            let now = Instant::now();

            while state.running < self.shared.config.max_concurrent_commands {
                let Some(next) = state.queue.pop() else {
                    break;
                };

                if next.reply.is_closed() {
                    state.rejected += 1;
                    tracing::debug!(command = %next.command, "Dropping cancelled command");
                    continue;
                }

                let waited = now.duration_since(next.enqueued_at);
                if waited >= self.shared.config.command_timeout {
                    state.failed += 1;
                    let _ = next.reply.send(Err(Error::QueueTimeout {
                        command: next.command,
                        waited,
                    }));
                    continue;
                }

                if let Err(e) = state.breaker.check(now) {
                    state.rejected += 1;
                    let _ = next.reply.send(Err(e));
                    continue;
                }

                state.running += 1;
                to_start.push(next);
            }
        }

        for job in to_start {
            let this = self.clone();
            tokio::spawn(async move { this.execute(job).await });
        }
    }

    async fn execute(self, mut job: Queued) {
        tracing::debug!(command = %job.command, attempt = job.attempt, "Command running");

        let result = self
            .shared
            .gateway
            .execute(&self.shared.workdir, &job.command)
            .await
            .and_then(|output| match detect_failure(&output) {
                Some(signal) => {
                    tracing::debug!(command = %job.command, line = %signal.line, "Output classified as failure");
                    Err(Error::CommandFailed {
                        command: job.command.clone(),
                        output: output.trim().to_string(),
                    })
                }
                None => Ok(output),
            });

        let retry = {
            let mut state = self.shared.state.lock();
            state.running -= 1;

            match &result {
                Ok(_) => {
                    state.breaker.record_success();
                    state.succeeded += 1;
                    false
                }
                Err(e) => {
                    if e.is_retryable() {
                        state.breaker.record_failure(Instant::now());
                    }
                    let retry = e.is_retryable()
                        && job.attempt < job.max_retries
                        && !job.reply.is_closed();
                    if retry {
                        state.retrying += 1;
                    } else {
                        state.failed += 1;
                    }
                    retry
                }
            }
        };

        if retry {
            job.attempt += 1;
            let delay = self.shared.config.retry_delay * job.attempt;
            if let Err(e) = &result {
                tracing::warn!(
                    command = %job.command,
                    attempt = job.attempt,
                    max_retries = job.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying command"
                );
            }
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                this.requeue(job);
            });
        } else {
            // Nobody may be listening any more; the result is dropped then
            let _ = job.reply.send(result);
        }

        self.pump();
    }

    /// Put a retried command back at its original priority
    fn requeue(&self, mut job: Queued) {
        {
            let mut state = self.shared.state.lock();
            state.retrying -= 1;

            if let Err(e) = state.breaker.check(Instant::now()) {
                state.failed += 1;
                let _ = job.reply.send(Err(e));
                return;
            }
            if state.queue.len() >= self.shared.config.max_queue_size {
                state.failed += 1;
                let _ = job.reply.send(Err(Error::QueueFull {
                    capacity: self.shared.config.max_queue_size,
                }));
                return;
            }

            job.seq = state.next_seq();
            job.enqueued_at = Instant::now();
            state.queue.push(job);
        }

        self.pump();
    }
}
