//! Operations the outer request layer invokes on the engine.
//!
//! Every call returns an [`ApiReply`] and is logged exactly once here; the
//! engine methods underneath only log state changes.
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::CounterError;
use crate::io::SharedIo;
use crate::machine::{ConfigureOutcome, CounterMachine, ItemOutcome, ResetOutcome, Transition};
use crate::sensor::{SensorDiagnostics, SensorMonitor};
use crate::sink::{OrderRef, ProgressRecord};
use crate::state::Phase;

/// Default number of history points returned when the caller gives none.
pub const DEFAULT_HISTORY_POINTS: usize = 180;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiReply<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiReply<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn err(e: &CounterError) -> Self {
        Self {
            success: false,
            message: e.to_string(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub order: String,
    pub article: String,
    pub article_description: String,
    pub cadence: u32,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub current_count: u64,
    pub target_count: u64,
    pub breakage_count: u64,
    /// Rounded mean of the recent throughput windows, items per hour.
    pub rolling_avg: f64,
    pub throughput: Vec<f64>,
    pub rolling: Vec<f64>,
    pub times: Vec<String>,
    pub cadences: Vec<u32>,
    pub stoppages: Vec<bool>,
    pub door_open: bool,
    pub phase: Phase,
    pub configured: bool,
    pub order_ref: Option<OrderRef>,
    pub last_door_fault: Option<String>,
    pub reported_at: String,
    pub estimated_completion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryReport {
    pub order: String,
    pub started_at: Option<String>,
    pub latest: Option<ProgressRecord>,
    pub throughput: Vec<f64>,
    pub rolling: Vec<f64>,
    pub times: Vec<String>,
    pub cadences: Vec<u32>,
    pub stoppages: Vec<bool>,
    pub estimated_completion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IncrementReport {
    pub before: u64,
    pub after: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    #[serde(flatten)]
    pub sensor: SensorDiagnostics,
    pub phase: Phase,
    pub current_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DoorReport {
    pub door_open: bool,
}

fn reply<T>(op: &'static str, res: Result<T, CounterError>, ok_msg: &str) -> ApiReply<T> {
    match res {
        Ok(v) => {
            tracing::info!(op, "{ok_msg}");
            ApiReply::ok(ok_msg, v)
        }
        Err(e) if e.is_rejection() => {
            tracing::warn!(op, error = %e, "operation rejected");
            ApiReply::err(&e)
        }
        Err(e) => {
            tracing::error!(op, error = %e, "operation failed");
            ApiReply::err(&e)
        }
    }
}

/// Cheap-to-clone handle over the machine and the sensor monitor.
#[derive(Clone)]
pub struct ControlApi {
    machine: Arc<CounterMachine>,
    sensor: Arc<Mutex<SensorMonitor<SharedIo>>>,
}

impl ControlApi {
    pub fn new(machine: Arc<CounterMachine>, sensor: Arc<Mutex<SensorMonitor<SharedIo>>>) -> Self {
        Self { machine, sensor }
    }

    pub fn machine(&self) -> &Arc<CounterMachine> {
        &self.machine
    }

    pub fn configure(&self, order: &str, target: u64) -> ApiReply<ConfigureOutcome> {
        reply("configure", self.machine.configure(order, target), "order configured")
    }

    pub fn start(&self) -> ApiReply<Transition> {
        reply("start", self.machine.start(), "counting started")
    }

    pub fn stop(&self) -> ApiReply<Transition> {
        reply("stop", self.machine.stop(), "counting stopped")
    }

    pub fn pause(&self) -> ApiReply<Transition> {
        reply("pause", self.machine.pause(), "counting paused")
    }

    pub fn resume(&self) -> ApiReply<Transition> {
        reply("resume", self.machine.resume(), "counting resumed")
    }

    pub fn adjust_breakage(&self, n: u64) -> ApiReply<u64> {
        reply("adjust_breakage", self.machine.adjust_breakage(n), "breakage registered")
    }

    pub fn get_status(&self) -> ApiReply<StatusReport> {
        let status = self.machine.status();
        tracing::debug!(op = "get_status", phase = %status.phase, count = status.current_count, "status read");
        ApiReply::ok("ok", status)
    }

    pub fn configure_sensor(&self, invert: Option<bool>, pullup: Option<bool>) -> ApiReply<SensorDiagnostics> {
        let res = {
            let mut s = self.sensor.lock();
            s.configure(invert, pullup).map(|()| s.diagnostics())
        };
        reply("configure_sensor", res, "sensor configured")
    }

    /// Count one item by hand; the minimum interval still applies.
    pub fn manual_increment(&self) -> ApiReply<IncrementReport> {
        let before = self.machine.current_count();
        let res = match self.machine.register_item() {
            Ok(ItemOutcome::Counted(after)) => Ok(IncrementReport { before, after }),
            Ok(ItemOutcome::TooSoon) => Err(CounterError::InvalidArgument(
                "item rejected: minimum interval not elapsed".into(),
            )),
            Ok(ItemOutcome::AtThreshold) => Err(CounterError::InvalidArgument(
                "item rejected: target already reached".into(),
            )),
            Err(e) => Err(e),
        };
        reply("manual_increment", res, "item counted")
    }

    pub fn get_sensor_diagnostics(&self) -> ApiReply<DiagnosticsReport> {
        let phase = self.machine.phase();
        let current_count = self.machine.current_count();
        let sensor = self.sensor.lock().diagnostics();
        ApiReply::ok(
            "ok",
            DiagnosticsReport {
                sensor,
                phase,
                current_count,
            },
        )
    }

    pub fn open_door(&self) -> ApiReply<DoorReport> {
        let res = self.machine.open_door().map(|door_open| DoorReport { door_open });
        reply("open_door", res, "door opened")
    }

    pub fn close_door(&self) -> ApiReply<DoorReport> {
        let res = self.machine.close_door().map(|door_open| DoorReport { door_open });
        reply("close_door", res, "door closed")
    }

    pub fn reset(&self) -> ApiReply<ResetOutcome> {
        reply("reset", self.machine.reset(), "counter reset")
    }

    pub fn history(&self, order: Option<&str>, max_points: Option<usize>) -> ApiReply<HistoryReport> {
        let points = max_points.filter(|n| *n > 0).unwrap_or(DEFAULT_HISTORY_POINTS);
        reply("history", self.machine.history(order, points), "history loaded")
    }
}
