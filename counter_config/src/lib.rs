#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the bottle-line counter.
//!
//! `Config` and its sections are deserialized from TOML; every section except
//! `[pins]` is optional and falls back to the line's factory defaults.
//! Call [`Config::validate`] before handing the config to the engine.
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Pins {
    /// BCM number of the item sensor input.
    pub sensor: u8,
    /// BCM number of the gate/door output.
    pub door: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorCfg {
    pub poll_ms: u64,
    /// Minimum spacing between two accepted items (secondary debounce).
    pub min_item_interval_ms: u64,
    pub pullup: bool,
    pub invert: bool,
    /// Consecutive read failures that trigger a re-initialisation.
    pub max_read_errors: u32,
    pub reinit_cooldown_s: u64,
    pub max_reinit_attempts: u32,
    /// Stabilisation delay after (re)configuring the pin.
    pub settle_ms: u64,
    pub init_retry_s: u64,
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            poll_ms: 10,
            min_item_interval_ms: 50,
            pullup: true,
            invert: false,
            max_read_errors: 10,
            reinit_cooldown_s: 60,
            max_reinit_attempts: 5,
            settle_ms: 200,
            init_retry_s: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StatsCfg {
    pub history_len: usize,
    pub rolling_window: usize,
    /// Nominal bottles/hour used when the article carries no cadence.
    pub default_cadence: u32,
}

impl Default for StatsCfg {
    fn default() -> Self {
        Self {
            history_len: 1000,
            rolling_window: 10,
            default_cadence: 6000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatchdogCfg {
    pub check_s: u64,
    pub idle_s: u64,
}

impl Default for WatchdogCfg {
    fn default() -> Self {
        Self {
            check_s: 30,
            idle_s: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PersistenceCfg {
    pub path: PathBuf,
    /// Persist a snapshot every N counted items.
    pub save_every: u64,
}

impl Default for PersistenceCfg {
    fn default() -> Self {
        Self {
            path: PathBuf::from("counter_state.backup"),
            save_every: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Jsonl,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SinkCfg {
    pub kind: SinkKind,
    pub path: PathBuf,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for SinkCfg {
    fn default() -> Self {
        Self {
            kind: SinkKind::Jsonl,
            path: PathBuf::from("orders.jsonl"),
            max_attempts: 3,
            retry_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub pins: Pins,
    #[serde(default)]
    pub sensor: SensorCfg,
    #[serde(default)]
    pub stats: StatsCfg,
    #[serde(default)]
    pub watchdog: WatchdogCfg,
    #[serde(default)]
    pub persistence: PersistenceCfg,
    #[serde(default)]
    pub sink: SinkCfg,
    #[serde(default)]
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pins: Pins {
                sensor: 22,
                door: 23,
            },
            sensor: SensorCfg::default(),
            stats: StatsCfg::default(),
            watchdog: WatchdogCfg::default(),
            persistence: PersistenceCfg::default(),
            sink: SinkCfg::default(),
            logging: Logging::default(),
        }
    }
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("reading config {}: {e}", path.display()))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parsing config {}: {e}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Pins
        if self.pins.sensor == self.pins.door {
            eyre::bail!("pins.sensor and pins.door must differ");
        }
        if self.pins.sensor > 27 || self.pins.door > 27 {
            eyre::bail!("pins must be BCM numbers in 0..=27");
        }

        // Sensor
        if self.sensor.poll_ms == 0 {
            eyre::bail!("sensor.poll_ms must be >= 1");
        }
        if self.sensor.poll_ms > 1000 {
            eyre::bail!("sensor.poll_ms is unreasonably large (>1s)");
        }
        if self.sensor.max_read_errors == 0 {
            eyre::bail!("sensor.max_read_errors must be >= 1");
        }
        if self.sensor.reinit_cooldown_s == 0 {
            eyre::bail!("sensor.reinit_cooldown_s must be >= 1");
        }
        if self.sensor.max_reinit_attempts == 0 {
            eyre::bail!("sensor.max_reinit_attempts must be >= 1");
        }
        if self.sensor.init_retry_s == 0 {
            eyre::bail!("sensor.init_retry_s must be >= 1");
        }

        // Stats
        if self.stats.history_len == 0 {
            eyre::bail!("stats.history_len must be >= 1");
        }
        if self.stats.rolling_window == 0 {
            eyre::bail!("stats.rolling_window must be >= 1");
        }
        if self.stats.default_cadence == 0 {
            eyre::bail!("stats.default_cadence must be > 0");
        }

        // Watchdog
        if self.watchdog.check_s == 0 {
            eyre::bail!("watchdog.check_s must be >= 1");
        }
        if self.watchdog.idle_s < self.watchdog.check_s {
            eyre::bail!("watchdog.idle_s must be >= watchdog.check_s");
        }

        // Persistence
        if self.persistence.save_every == 0 {
            eyre::bail!("persistence.save_every must be >= 1");
        }
        if self.persistence.path.as_os_str().is_empty() {
            eyre::bail!("persistence.path must not be empty");
        }

        // Sink
        if self.sink.max_attempts == 0 {
            eyre::bail!("sink.max_attempts must be >= 1");
        }
        if self.sink.kind == SinkKind::Jsonl && self.sink.path.as_os_str().is_empty() {
            eyre::bail!("sink.path must not be empty for the jsonl sink");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_takes_line_defaults() {
        let cfg = load_toml("[pins]\nsensor = 22\ndoor = 23\n").unwrap();
        assert_eq!(cfg.sensor.min_item_interval_ms, 50);
        assert_eq!(cfg.stats.history_len, 1000);
        assert_eq!(cfg.watchdog.idle_s, 600);
        assert_eq!(cfg.persistence.save_every, 10);
        cfg.validate().unwrap();
    }

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }
}
