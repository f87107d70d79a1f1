//! Throughput sampling over fixed windows with a bounded history.
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::NaiveDateTime;
use counter_traits::Clock;
use serde::Serialize;

use crate::config::{RetryCfg, STATS_WINDOW, StatsCfg};
use crate::error::CounterError;
use crate::hw_error::map_sink_error;
use crate::machine::CounterMachine;
use crate::sink::{ts_format, with_retry};
use crate::state::Phase;
use crate::util::{sleep_unless, wall_now};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSample {
    pub throughput_per_hour: f64,
    pub throughput_rolling_avg: f64,
    #[serde(with = "ts_format")]
    pub timestamp: NaiveDateTime,
    pub cadence_nominal: u32,
    pub stoppage: bool,
}

fn valid(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

/// Items per hour for `delta` items observed over `window`.
#[allow(clippy::cast_precision_loss)]
pub fn throughput_per_hour(delta: u64, window: Duration) -> f64 {
    delta as f64 * 3600.0 / window.as_secs_f64()
}

/// Ring of samples; oldest dropped first once `cap` is reached.
#[derive(Debug, Clone)]
pub struct StatsHistory {
    samples: VecDeque<StatsSample>,
    cap: usize,
    rolling_window: usize,
}

impl StatsHistory {
    pub fn new(cfg: &StatsCfg) -> Self {
        let cap = cfg.history_len.max(1);
        Self {
            samples: VecDeque::with_capacity(cap.min(1024)),
            cap,
            rolling_window: cfg.rolling_window.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn latest(&self) -> Option<&StatsSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatsSample> {
        self.samples.iter()
    }

    /// Rounded mean of the valid values among the most recent `rolling_window`
    /// throughput samples; 0 when none are valid.
    #[allow(clippy::cast_precision_loss)]
    pub fn rolling_avg(&self) -> f64 {
        let recent = self
            .samples
            .iter()
            .rev()
            .take(self.rolling_window)
            .map(|s| s.throughput_per_hour)
            .filter(|v| valid(*v));
        let (sum, n) = recent.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if n == 0 { 0.0 } else { (sum / n as f64).round() }
    }

    pub fn push(&mut self, sample: StatsSample) {
        while self.samples.len() >= self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Record one window and return the stored sample.
    pub fn record(
        &mut self,
        delta: u64,
        window: Duration,
        cadence_nominal: u32,
        stoppage: bool,
        timestamp: NaiveDateTime,
    ) -> StatsSample {
        let throughput = throughput_per_hour(delta, window);
        if !valid(throughput) {
            tracing::warn!(delta, ?window, "invalid throughput excluded from average");
        }
        let mut sample = StatsSample {
            throughput_per_hour: throughput,
            throughput_rolling_avg: 0.0,
            timestamp,
            cadence_nominal,
            stoppage,
        };
        self.push(sample.clone());
        sample.throughput_rolling_avg = self.rolling_avg();
        if let Some(last) = self.samples.back_mut() {
            last.throughput_rolling_avg = sample.throughput_rolling_avg;
        }
        sample
    }

    /// Samples taken at or after `since` (all of them when `since` is None).
    pub fn since(&self, since: Option<NaiveDateTime>) -> Vec<StatsSample> {
        self.samples
            .iter()
            .filter(|s| since.is_none_or(|t| s.timestamp >= t))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatsTick {
    Sampled(StatsSample),
    Finalized,
    Idle,
    /// Shutdown arrived mid-window; nothing recorded.
    Interrupted,
}

/// Samples the tally every window while counting; pushes the final record
/// once an order has stopped.
pub struct StatsAggregator {
    machine: Arc<CounterMachine>,
    clock: Arc<dyn Clock + Send + Sync>,
    retry: RetryCfg,
    window: Duration,
}

impl StatsAggregator {
    pub fn new(
        machine: Arc<CounterMachine>,
        clock: Arc<dyn Clock + Send + Sync>,
        retry: RetryCfg,
    ) -> Self {
        Self {
            machine,
            clock,
            retry,
            window: STATS_WINDOW,
        }
    }

    /// One aggregation cycle; blocks for about one window.
    pub fn tick(&self, stop: &AtomicBool) -> Result<StatsTick, CounterError> {
        if self.machine.phase() == Phase::Counting {
            let before = self.machine.current_count();
            if !sleep_unless(&*self.clock, self.window, stop) {
                return Ok(StatsTick::Interrupted);
            }
            let after = self.machine.current_count();
            let stoppage = self.machine.take_stoppage();
            let cadence = self.machine.article().cadence;
            let sample = self.machine.record_stats(|h| {
                h.record(
                    after.saturating_sub(before),
                    self.window,
                    cadence,
                    stoppage,
                    wall_now(),
                )
            });
            tracing::debug!(
                delta = after.saturating_sub(before),
                per_hour = sample.throughput_per_hour,
                avg = sample.throughput_rolling_avg,
                "stats window"
            );
            if let Some(rec) = self.machine.progress_record(&sample) {
                self.machine.jobs().push_progress(rec);
            }
            return Ok(StatsTick::Sampled(sample));
        }

        if self.machine.phase() == Phase::Stopped
            && let Some(rec) = self.machine.take_finalize()
        {
            let sink = self.machine.sink();
            return match with_retry("finalize_order", self.retry, &*self.clock, || {
                sink.finalize_order(&rec)
            }) {
                Ok(()) => {
                    tracing::info!(order = %rec.order, count = rec.current_count, "order finalized");
                    Ok(StatsTick::Finalized)
                }
                Err(e) => {
                    tracing::warn!(order = %rec.order, error = %e, "final record dropped");
                    Err(map_sink_error(&*e))
                }
            };
        }

        sleep_unless(&*self.clock, self.window, stop);
        Ok(StatsTick::Idle)
    }
}
