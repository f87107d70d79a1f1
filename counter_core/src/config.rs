//! Runtime configuration consumed by the engine.
use std::path::PathBuf;
use std::time::Duration;

/// Fixed throughput sampling window.
pub const STATS_WINDOW: Duration = Duration::from_secs(5);

/// Interval between sensor heartbeat log lines.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SensorCfg {
    pub pin: u8,
    pub poll: Duration,
    pub pullup: bool,
    pub invert: bool,
    pub max_read_errors: u32,
    pub reinit_cooldown: Duration,
    pub max_reinit_attempts: u32,
    pub settle: Duration,
    pub init_retry: Duration,
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            pin: 22,
            poll: Duration::from_millis(10),
            pullup: true,
            invert: false,
            max_read_errors: 10,
            reinit_cooldown: Duration::from_secs(60),
            max_reinit_attempts: 5,
            settle: Duration::from_millis(200),
            init_retry: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MachineCfg {
    pub door_pin: u8,
    pub min_item_interval: Duration,
    /// Persist a snapshot every N counted items.
    pub save_every: u64,
    pub default_cadence: u32,
}

impl Default for MachineCfg {
    fn default() -> Self {
        Self {
            door_pin: 23,
            min_item_interval: Duration::from_millis(50),
            save_every: 10,
            default_cadence: 6000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsCfg {
    pub history_len: usize,
    pub rolling_window: usize,
}

impl Default for StatsCfg {
    fn default() -> Self {
        Self {
            history_len: 1000,
            rolling_window: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchdogCfg {
    pub check: Duration,
    pub idle: Duration,
}

impl Default for WatchdogCfg {
    fn default() -> Self {
        Self {
            check: Duration::from_secs(30),
            idle: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceCfg {
    pub path: PathBuf,
}

impl Default for PersistenceCfg {
    fn default() -> Self {
        Self {
            path: PathBuf::from("counter_state.backup"),
        }
    }
}

/// Bounded retry for idempotent sink writes.
#[derive(Debug, Clone, Copy)]
pub struct RetryCfg {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}
