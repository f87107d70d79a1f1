//! Auto-pause after a prolonged stretch of counting with no new items.
use std::time::{Duration, Instant};

use crate::error::CounterError;
use crate::machine::{CounterMachine, Transition};
use crate::state::Phase;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// Not counting; idle timer reset.
    Inactive,
    Active,
    Paused(Transition),
}

#[derive(Debug)]
pub struct AutoPauseWatchdog {
    idle: Duration,
    last_count: Option<u64>,
    last_change: Option<Instant>,
}

impl AutoPauseWatchdog {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            last_count: None,
            last_change: None,
        }
    }

    pub fn check(
        &mut self,
        machine: &CounterMachine,
        now: Instant,
    ) -> Result<WatchdogOutcome, CounterError> {
        if machine.phase() != Phase::Counting {
            self.last_count = None;
            self.last_change = None;
            return Ok(WatchdogOutcome::Inactive);
        }
        let count = machine.current_count();
        match (self.last_count, self.last_change) {
            (Some(prev), Some(since)) if prev == count => {
                if now.saturating_duration_since(since) > self.idle {
                    let tr = machine.pause_idle()?;
                    tracing::info!(count, idle_s = self.idle.as_secs(), "auto-paused after inactivity");
                    self.last_count = None;
                    self.last_change = None;
                    return Ok(WatchdogOutcome::Paused(tr));
                }
            }
            _ => {
                self.last_count = Some(count);
                self.last_change = Some(now);
            }
        }
        Ok(WatchdogOutcome::Active)
    }
}
