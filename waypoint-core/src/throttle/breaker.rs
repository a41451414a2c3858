//! Circuit breaker over a project's command stream

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{Error, Result};

/// Breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    /// Commands flow normally
    #[default]
    Closed,
    /// Commands are rejected until the cooldown elapses
    Open,
    /// Cooldown elapsed; the next result decides
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        };
        write!(f, "{}", s)
    }
}

/// Consecutive-failure circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    failure_count: u32,
    opened_at: Option<Instant>,
    state: BreakerState,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            failure_count: 0,
            opened_at: None,
            state: BreakerState::Closed,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Admit or reject a command at `now`
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and
    /// admits the command.
    pub fn check(&mut self, now: Instant) -> Result<()> {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let reopen_at = opened_at + self.cooldown;
                if now >= reopen_at {
                    tracing::info!(failures = self.failure_count, "Circuit breaker half-open");
                    self.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        failures: self.failure_count,
                        retry_in: reopen_at - now,
                    })
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            tracing::info!("Circuit breaker closed");
        }
        self.failure_count = 0;
        self.opened_at = None;
        self.state = BreakerState::Closed;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);

        let trip = match self.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => self.failure_count >= self.threshold,
            BreakerState::Open => false,
        };

        if trip {
            tracing::warn!(
                failures = self.failure_count,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "Circuit breaker opened"
            );
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.check(now).is_ok());

        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(
            breaker.check(now + Duration::from_secs(5)),
            Err(Error::CircuitOpen { failures: 3, .. })
        ));
    }

    #[test]
    fn test_success_resets_count_while_closed() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        breaker.record_failure(now);
        breaker.record_failure(now);
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);

        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_then_close() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure(now);

        let later = now + Duration::from_secs(30);
        assert!(breaker.check(later).is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.opened_at().is_none());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(10));
        breaker.record_failure(now);
        breaker.record_failure(now);

        let later = now + Duration::from_secs(11);
        breaker.check(later).unwrap();
        breaker.record_failure(later);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.check(later + Duration::from_secs(1)).is_err());
    }
}
