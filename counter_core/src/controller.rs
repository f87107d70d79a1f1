//! Controller assembly and background loop lifecycle.
//!
//! `ControllerBuilder::try_build()` checks that I/O and a sink were provided and
//! that the configuration is coherent. `Controller::start()` initialises the
//! pins, restores the last snapshot and spawns the sensor, stats, watchdog and
//! job loops. `Controller::shutdown()` (also run on drop) joins the loops,
//! parks the door, releases the sensor and writes a final snapshot.
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use counter_traits::{Clock, DigitalIo, MonotonicClock};
use eyre::WrapErr;
use parking_lot::Mutex;

use crate::api::ControlApi;
use crate::config::{MachineCfg, PersistenceCfg, RetryCfg, SensorCfg, StatsCfg, WatchdogCfg};
use crate::door::DoorActuator;
use crate::error::{BuildError, Result};
use crate::io::SharedIo;
use crate::machine::{CounterMachine, ItemOutcome};
use crate::persistence::PersistenceGateway;
use crate::sensor::{PollOutcome, SensorMonitor};
use crate::sink::OrderSink;
use crate::state::Phase;
use crate::stats::StatsAggregator;
use crate::watchdog::AutoPauseWatchdog;
use crate::worker::Worker;

/// How long the job loop waits for work before re-checking its flags.
const JOB_WAIT: Duration = Duration::from_millis(100);

#[derive(Default)]
pub struct ControllerBuilder {
    io: Option<SharedIo>,
    sink: Option<Arc<dyn OrderSink>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    sensor: SensorCfg,
    machine: MachineCfg,
    stats: StatsCfg,
    watchdog: WatchdogCfg,
    persistence: PersistenceCfg,
    retry: RetryCfg,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_io<I: DigitalIo + Send + 'static>(mut self, io: I) -> Self {
        self.io = Some(SharedIo::new(io));
        self
    }

    #[must_use]
    pub fn with_shared_io(mut self, io: SharedIo) -> Self {
        self.io = Some(io);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn OrderSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Apply every section of a loaded configuration.
    #[must_use]
    pub fn with_config(mut self, cfg: &counter_config::Config) -> Self {
        self.sensor = SensorCfg::from(cfg);
        self.machine = MachineCfg::from(cfg);
        self.stats = StatsCfg::from(&cfg.stats);
        self.watchdog = WatchdogCfg::from(&cfg.watchdog);
        self.persistence = PersistenceCfg::from(&cfg.persistence);
        self.retry = RetryCfg::from(&cfg.sink);
        self
    }

    #[must_use]
    pub fn with_sensor_cfg(mut self, cfg: SensorCfg) -> Self {
        self.sensor = cfg;
        self
    }

    #[must_use]
    pub fn with_machine_cfg(mut self, cfg: MachineCfg) -> Self {
        self.machine = cfg;
        self
    }

    #[must_use]
    pub fn with_watchdog_cfg(mut self, cfg: WatchdogCfg) -> Self {
        self.watchdog = cfg;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryCfg) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_persistence_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence.path = path.into();
        self
    }

    pub fn try_build(self) -> Result<Controller> {
        let io = self.io.ok_or(BuildError::MissingIo)?;
        let sink = self.sink.ok_or(BuildError::MissingSink)?;
        if self.sensor.pin == self.machine.door_pin {
            return Err(BuildError::InvalidConfig("sensor and door pins must differ").into());
        }
        if self.machine.save_every == 0 {
            return Err(BuildError::InvalidConfig("save_every must be >= 1").into());
        }
        if self.sensor.poll.is_zero() {
            return Err(BuildError::InvalidConfig("sensor poll period must be > 0").into());
        }
        let clock: Arc<dyn Clock + Send + Sync> =
            self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        let door = DoorActuator::new(io.clone(), self.machine.door_pin);
        let machine = Arc::new(CounterMachine::new(
            door,
            sink,
            PersistenceGateway::new(self.persistence.path),
            clock.clone(),
            self.machine,
            &self.stats,
            self.retry,
        ));
        let poll = self.sensor.poll;
        let sensor = Arc::new(Mutex::new(SensorMonitor::new(io.clone(), self.sensor, clock.clone())));
        Ok(Controller {
            machine,
            sensor,
            clock,
            poll,
            watchdog: self.watchdog,
            retry: self.retry,
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            prepared: false,
            finished: false,
        })
    }
}

pub struct Controller {
    machine: Arc<CounterMachine>,
    sensor: Arc<Mutex<SensorMonitor<SharedIo>>>,
    clock: Arc<dyn Clock + Send + Sync>,
    poll: Duration,
    watchdog: WatchdogCfg,
    retry: RetryCfg,
    shutdown: Arc<AtomicBool>,
    workers: Vec<Worker>,
    prepared: bool,
    finished: bool,
}

impl core::fmt::Debug for Controller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("machine", &self.machine)
            .field("workers", &self.workers.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    pub fn api(&self) -> ControlApi {
        ControlApi::new(self.machine.clone(), self.sensor.clone())
    }

    pub fn machine(&self) -> &Arc<CounterMachine> {
        &self.machine
    }

    /// Flag observed by every loop; setting it requests shutdown.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn worker_names(&self) -> Vec<&'static str> {
        self.workers.iter().map(Worker::name).collect()
    }

    /// Initialise pins and restore the last snapshot without spawning loops.
    /// Returns the restored phase, if any order was restored.
    pub fn prepare(&mut self) -> Option<Phase> {
        if self.prepared {
            return Some(self.machine.phase());
        }
        self.prepared = true;
        if let Err(e) = self.machine.init_door() {
            tracing::error!(error = %e, "door init failed; will retry on next actuation");
        }
        if let Err(e) = self.sensor.lock().init() {
            tracing::warn!(error = %e, "sensor init failed; the sensor loop will retry");
        }
        let snap = self.machine.persistence().load()?;
        self.machine.restore(&snap)
    }

    pub fn start(&mut self) -> Result<()> {
        if !self.workers.is_empty() {
            return Ok(());
        }
        self.prepare();
        let sd = &self.shutdown;

        let machine = self.machine.clone();
        let sensor = self.sensor.clone();
        let sensor_worker = Worker::spawn("counter-sensor", self.poll, sd.clone(), self.clock.clone(), move |_| {
            let counting = machine.phase() == Phase::Counting;
            let (outcome, heartbeat) = {
                let mut s = sensor.lock();
                let outcome = s.poll(counting);
                let hb = if s.heartbeat_due() { Some(s.diagnostics()) } else { None };
                (outcome, hb)
            };
            if let Some(d) = heartbeat {
                tracing::info!(
                    pin = d.pin,
                    level = ?d.level,
                    armed = d.armed,
                    phase = %machine.phase(),
                    errors = d.consecutive_errors,
                    "sensor heartbeat"
                );
            }
            if outcome == PollOutcome::Item {
                match machine.register_item() {
                    Ok(ItemOutcome::Counted(n)) => tracing::debug!(count = n, "item"),
                    Ok(other) => tracing::debug!(?other, "item not counted"),
                    // phase changed between the poll and the count
                    Err(e) => tracing::debug!(error = %e, "item dropped"),
                }
            }
            Ok(())
        })
        .wrap_err("spawning sensor loop")?;

        let stats = StatsAggregator::new(self.machine.clone(), self.clock.clone(), self.retry);
        let stats_worker = Worker::spawn("counter-stats", Duration::ZERO, sd.clone(), self.clock.clone(), move |stop| {
            stats.tick(stop).map(|_| ())
        })
        .wrap_err("spawning stats loop")?;

        let machine = self.machine.clone();
        let clock = self.clock.clone();
        let mut watchdog = AutoPauseWatchdog::new(self.watchdog.idle);
        let watchdog_worker = Worker::spawn("counter-watchdog", self.watchdog.check, sd.clone(), self.clock.clone(), move |_| {
            watchdog.check(&machine, clock.now()).map(|_| ())
        })
        .wrap_err("spawning watchdog loop")?;

        let machine = self.machine.clone();
        let job_worker = Worker::spawn("counter-jobs", Duration::ZERO, sd.clone(), self.clock.clone(), move |_| {
            machine.process_jobs(JOB_WAIT);
            Ok(())
        })
        .wrap_err("spawning job loop")?;

        self.workers = vec![sensor_worker, stats_worker, watchdog_worker, job_worker];
        tracing::info!(phase = %self.machine.phase(), "controller started");
        Ok(())
    }

    /// Stop the loops, park the hardware and persist. Idempotent.
    pub fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.shutdown.store(true, Ordering::Relaxed);
        // dropping joins each thread
        self.workers.clear();
        self.machine.drain_jobs();
        self.machine.park_door();
        if let Err(e) = self.sensor.lock().release() {
            tracing::warn!(error = %e, "sensor release failed");
        }
        self.machine.persist_now();
        tracing::info!(phase = %self.machine.phase(), count = self.machine.current_count(), "controller shut down");
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
