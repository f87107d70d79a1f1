//! Common time and file helpers for counter_core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use std::{fs, io::Write, path::Path};

use chrono::{Local, NaiveDateTime, Timelike};
use counter_traits::Clock;

/// Wall-clock format used in snapshots, records and status replies.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Longest single sleep taken while waiting on a shutdown flag.
pub const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Local wall time truncated to whole seconds.
pub fn wall_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), TS_FORMAT).ok()
}

/// Sleep `total` in slices, returning early (false) once `stop` is set.
pub fn sleep_unless(clock: &dyn Clock, total: Duration, stop: &AtomicBool) -> bool {
    let mut left = total;
    while !left.is_zero() {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = left.min(SLEEP_SLICE);
        clock.sleep(step);
        left = left.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}

/// Write-temp, fsync, rename. Readers see either the old or the new file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use counter_traits::clock::test_clock::TestClock;

    #[test]
    fn timestamps_round_trip_at_second_precision() {
        let ts = wall_now();
        assert_eq!(parse_ts(&format_ts(&ts)), Some(ts));
        assert_eq!(parse_ts("garbage"), None);
    }

    #[test]
    fn sleep_unless_stops_early() {
        let clock = TestClock::new();
        let stop = AtomicBool::new(true);
        assert!(!sleep_unless(&clock, Duration::from_secs(5), &stop));
        assert_eq!(clock.elapsed(), Duration::ZERO);

        let go = AtomicBool::new(false);
        assert!(sleep_unless(&clock, Duration::from_millis(120), &go));
        assert_eq!(clock.elapsed(), Duration::from_millis(120));
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("state.backup");
        write_atomic(&p, b"a=1\n").unwrap();
        write_atomic(&p, b"a=2\n").unwrap();
        assert_eq!(fs::read_to_string(&p).unwrap(), "a=2\n");
        assert!(!p.with_extension("new").exists());
    }
}
