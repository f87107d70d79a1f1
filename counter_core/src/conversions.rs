//! `From` conversions between `counter_config` and engine config types.

use std::time::Duration;

use crate::config::{MachineCfg, PersistenceCfg, RetryCfg, SensorCfg, StatsCfg, WatchdogCfg};

// ── Sensor ──────────────────────────────────────────────────────────────────

impl From<&counter_config::Config> for SensorCfg {
    fn from(c: &counter_config::Config) -> Self {
        let s = &c.sensor;
        Self {
            pin: c.pins.sensor,
            poll: Duration::from_millis(s.poll_ms.max(1)),
            pullup: s.pullup,
            invert: s.invert,
            max_read_errors: s.max_read_errors.max(1),
            reinit_cooldown: Duration::from_secs(s.reinit_cooldown_s),
            max_reinit_attempts: s.max_reinit_attempts,
            settle: Duration::from_millis(s.settle_ms),
            init_retry: Duration::from_secs(s.init_retry_s.max(1)),
        }
    }
}

// ── Machine ─────────────────────────────────────────────────────────────────

impl From<&counter_config::Config> for MachineCfg {
    fn from(c: &counter_config::Config) -> Self {
        Self {
            door_pin: c.pins.door,
            min_item_interval: Duration::from_millis(c.sensor.min_item_interval_ms),
            save_every: c.persistence.save_every.max(1),
            default_cadence: c.stats.default_cadence,
        }
    }
}

// ── Stats ───────────────────────────────────────────────────────────────────

impl From<&counter_config::StatsCfg> for StatsCfg {
    fn from(s: &counter_config::StatsCfg) -> Self {
        Self {
            history_len: s.history_len.max(1),
            rolling_window: s.rolling_window.max(1),
        }
    }
}

// ── Watchdog ────────────────────────────────────────────────────────────────

impl From<&counter_config::WatchdogCfg> for WatchdogCfg {
    fn from(w: &counter_config::WatchdogCfg) -> Self {
        Self {
            check: Duration::from_secs(w.check_s.max(1)),
            idle: Duration::from_secs(w.idle_s),
        }
    }
}

// ── Persistence / sink ──────────────────────────────────────────────────────

impl From<&counter_config::PersistenceCfg> for PersistenceCfg {
    fn from(p: &counter_config::PersistenceCfg) -> Self {
        Self {
            path: p.path.clone(),
        }
    }
}

impl From<&counter_config::SinkCfg> for RetryCfg {
    fn from(s: &counter_config::SinkCfg) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            delay: Duration::from_millis(s.retry_delay_ms),
        }
    }
}
