//! Recovery snapshot: plain `key=value` lines, replaced atomically.
//!
//! The parser is lenient about unknown keys and missing fields (they take
//! their defaults) but rejects malformed values, so a corrupt file is reported
//! rather than silently half-restored.
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::CounterError;
use crate::sink::OrderRef;
use crate::state::{NO_ORDER, Phase, one_line};
use crate::util::{format_ts, parse_ts, write_atomic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoverySnapshot {
    /// Monotonic per-process write sequence; older snapshots never overwrite newer ones.
    pub seq: u64,
    pub phase: Phase,
    pub order: String,
    pub order_ref: Option<OrderRef>,
    pub article: String,
    pub configured: bool,
    pub current_count: u64,
    pub target_count: u64,
    pub breakage_count: u64,
    pub door_open: bool,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub finalize_pending: bool,
}

impl Default for RecoverySnapshot {
    fn default() -> Self {
        Self {
            seq: 0,
            phase: Phase::Stopped,
            order: NO_ORDER.to_string(),
            order_ref: None,
            article: String::new(),
            configured: false,
            current_count: 0,
            target_count: 0,
            breakage_count: 0,
            door_open: false,
            started_at: None,
            ended_at: None,
            finalize_pending: false,
        }
    }
}

fn flag(b: bool) -> u8 {
    u8::from(b)
}

fn opt_ts(ts: Option<&NaiveDateTime>) -> String {
    ts.map(format_ts).unwrap_or_default()
}

impl RecoverySnapshot {
    pub fn has_order(&self) -> bool {
        !self.order.is_empty() && self.order != NO_ORDER
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(256);
        let _ = writeln!(out, "seq={}", self.seq);
        let _ = writeln!(out, "phase={}", self.phase);
        let _ = writeln!(out, "order={}", one_line(&self.order));
        let _ = writeln!(
            out,
            "order_ref={}",
            self.order_ref.map(|r| r.0.to_string()).unwrap_or_default()
        );
        let _ = writeln!(out, "article={}", one_line(&self.article));
        let _ = writeln!(out, "configured={}", flag(self.configured));
        let _ = writeln!(out, "current_count={}", self.current_count);
        let _ = writeln!(out, "target_count={}", self.target_count);
        let _ = writeln!(out, "breakage_count={}", self.breakage_count);
        let _ = writeln!(out, "door_open={}", flag(self.door_open));
        let _ = writeln!(out, "started_at={}", opt_ts(self.started_at.as_ref()));
        let _ = writeln!(out, "ended_at={}", opt_ts(self.ended_at.as_ref()));
        let _ = writeln!(out, "finalize_pending={}", flag(self.finalize_pending));
        out
    }

    pub fn parse(text: &str) -> Result<Self, CounterError> {
        let mut snap = Self::default();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(bad(lineno, "missing '='"));
            };
            let value = value.trim();
            match key.trim() {
                "seq" => snap.seq = num(lineno, value)?,
                "phase" => {
                    snap.phase = Phase::parse(value).ok_or_else(|| bad(lineno, "unknown phase"))?;
                }
                "order" => {
                    let text = one_line(value);
                    let text = text.trim();
                    snap.order = if text.is_empty() {
                        NO_ORDER.to_string()
                    } else {
                        text.to_string()
                    };
                }
                "order_ref" => {
                    snap.order_ref = if value.is_empty() {
                        None
                    } else {
                        Some(OrderRef(num(lineno, value)?))
                    };
                }
                "article" => snap.article = one_line(value).trim().to_string(),
                "configured" => snap.configured = boolean(lineno, value)?,
                "current_count" => snap.current_count = num(lineno, value)?,
                "target_count" => snap.target_count = num(lineno, value)?,
                "breakage_count" => snap.breakage_count = num(lineno, value)?,
                "door_open" => snap.door_open = boolean(lineno, value)?,
                "started_at" => snap.started_at = timestamp(lineno, value)?,
                "ended_at" => snap.ended_at = timestamp(lineno, value)?,
                "finalize_pending" => snap.finalize_pending = boolean(lineno, value)?,
                other => tracing::debug!(key = other, "ignoring unknown snapshot key"),
            }
        }
        Ok(snap)
    }
}

fn bad(lineno: usize, what: &str) -> CounterError {
    CounterError::PersistenceFault(format!("snapshot line {}: {what}", lineno + 1))
}

fn num(lineno: usize, v: &str) -> Result<u64, CounterError> {
    v.parse().map_err(|_| bad(lineno, "expected a non-negative integer"))
}

fn boolean(lineno: usize, v: &str) -> Result<bool, CounterError> {
    match v {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(bad(lineno, "expected 0 or 1")),
    }
}

fn timestamp(lineno: usize, v: &str) -> Result<Option<NaiveDateTime>, CounterError> {
    if v.is_empty() {
        return Ok(None);
    }
    parse_ts(v)
        .map(Some)
        .ok_or_else(|| bad(lineno, "expected YYYY-MM-DD HH:MM:SS"))
}

/// Best-effort durable store for the recovery snapshot.
#[derive(Debug)]
pub struct PersistenceGateway {
    path: PathBuf,
    last_seq: Mutex<Option<u64>>,
}

impl PersistenceGateway {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_seq: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot, never raising. Returns whether it was written.
    pub fn save(&self, snap: &RecoverySnapshot) -> bool {
        let mut last = self.last_seq.lock();
        if last.is_some_and(|l| snap.seq < l) {
            tracing::debug!(seq = snap.seq, last = ?*last, "skipping stale snapshot");
            return false;
        }
        match write_atomic(&self.path, snap.encode().as_bytes()) {
            Ok(()) => {
                *last = Some(snap.seq);
                tracing::trace!(seq = snap.seq, path = %self.path.display(), "snapshot saved");
                true
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "snapshot write failed");
                false
            }
        }
    }

    /// Read the snapshot. A missing file is "no prior state".
    pub fn try_load(&self) -> Result<Option<RecoverySnapshot>, CounterError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CounterError::PersistenceFault(format!(
                    "reading {}: {e}",
                    self.path.display()
                )));
            }
        };
        RecoverySnapshot::parse(&text).map(Some)
    }

    /// Like [`Self::try_load`] but logs and swallows failures.
    pub fn load(&self) -> Option<RecoverySnapshot> {
        match self.try_load() {
            Ok(snap) => snap,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "snapshot unreadable; starting clean");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::wall_now;

    fn sample() -> RecoverySnapshot {
        RecoverySnapshot {
            seq: 7,
            phase: Phase::Counting,
            order: "ORD-1".into(),
            order_ref: Some(OrderRef(42)),
            article: "A-33".into(),
            configured: true,
            current_count: 57,
            target_count: 100,
            breakage_count: 3,
            door_open: true,
            started_at: Some(wall_now()),
            ended_at: None,
            finalize_pending: false,
        }
    }

    #[test]
    fn encode_parse_preserves_fields() {
        let s = sample();
        assert_eq!(RecoverySnapshot::parse(&s.encode()).unwrap(), s);
    }

    #[test]
    fn string_fields_cannot_inject_keys() {
        let s = RecoverySnapshot {
            phase: Phase::Stopped,
            order: "ORD-1\nphase=counting\ncurrent_count=999".into(),
            article: "A-1\r\nconfigured=1".into(),
            configured: false,
            current_count: 0,
            ..sample()
        };
        let text = s.encode();
        assert_eq!(text.lines().filter(|l| l.starts_with("phase=")).count(), 1);
        let back = RecoverySnapshot::parse(&text).unwrap();
        assert_eq!(back.phase, Phase::Stopped);
        assert_eq!(back.current_count, 0);
        assert!(!back.configured);
        assert_eq!(back.order, "ORD-1 phase=counting current_count=999");
        // stable on a second pass
        assert_eq!(RecoverySnapshot::parse(&back.encode()).unwrap(), back);
    }

    #[test]
    fn missing_keys_default_and_unknown_keys_are_ignored() {
        let s = RecoverySnapshot::parse("phase=paused\ncurrent_count=3\nlegacy=1\n").unwrap();
        assert_eq!(s.phase, Phase::Paused);
        assert_eq!(s.current_count, 3);
        assert_eq!(s.order, NO_ORDER);
        assert!(!s.has_order());
    }

    #[test]
    fn malformed_value_is_a_persistence_fault() {
        let err = RecoverySnapshot::parse("current_count=-4\n").unwrap_err();
        assert!(matches!(err, CounterError::PersistenceFault(m) if m.contains("line 1")));
        assert!(RecoverySnapshot::parse("door_open=maybe").is_err());
        assert!(RecoverySnapshot::parse("no equals sign").is_err());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let gw = PersistenceGateway::new(dir.path().join("absent.backup"));
        assert_eq!(gw.try_load().unwrap(), None);
    }

    #[test]
    fn stale_snapshot_does_not_overwrite_newer() {
        let dir = tempfile::tempdir().unwrap();
        let gw = PersistenceGateway::new(dir.path().join("state.backup"));
        let newer = sample();
        let mut older = sample();
        older.seq = 3;
        older.current_count = 10;
        assert!(gw.save(&newer));
        assert!(!gw.save(&older));
        assert_eq!(gw.load().unwrap().current_count, 57);
    }

    #[test]
    fn write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let gw = PersistenceGateway::new(dir.path().join("missing-dir").join("state.backup"));
        assert!(!gw.save(&sample()));
    }

    #[test]
    fn corrupt_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("state.backup");
        std::fs::write(&p, "phase=sideways\n").unwrap();
        let gw = PersistenceGateway::new(&p);
        assert!(gw.try_load().is_err());
        assert_eq!(gw.load(), None);
    }
}
