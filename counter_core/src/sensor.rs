//! Polled item sensor with edge debounce and read-error recovery.
use std::sync::Arc;
use std::time::Instant;

use counter_traits::{Clock, DigitalIo, Level, PinDirection, Pull};
use serde::Serialize;

use crate::config::{HEARTBEAT_INTERVAL, SensorCfg};
use crate::edge::EdgeDetector;
use crate::error::CounterError;
use crate::hw_error::map_hw_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Pin not usable yet; an init attempt may have been made.
    NotReady,
    /// Not counting; the pin was left alone.
    Skipped,
    Idle,
    /// One complete pulse was observed.
    Item,
    ReadError,
    Reinitialized,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorDiagnostics {
    pub pin: u8,
    pub level: Option<u8>,
    pub armed: bool,
    pub pullup: bool,
    pub invert: bool,
    pub consecutive_errors: u32,
    pub initialised: bool,
    pub hardware_fault: bool,
    pub reinit_attempts: u32,
}

pub struct SensorMonitor<I: DigitalIo> {
    io: I,
    cfg: SensorCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    edge: EdgeDetector,
    initialised: bool,
    last_level: Option<Level>,
    consecutive_errors: u32,
    reinit_attempts: u32,
    last_reinit_at: Option<Instant>,
    next_init_at: Option<Instant>,
    hardware_fault: bool,
    last_heartbeat: Option<Instant>,
}

impl<I: DigitalIo> SensorMonitor<I> {
    pub fn new(io: I, cfg: SensorCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            io,
            cfg,
            clock,
            edge: EdgeDetector::new(),
            initialised: false,
            last_level: None,
            consecutive_errors: 0,
            reinit_attempts: 0,
            last_reinit_at: None,
            next_init_at: None,
            hardware_fault: false,
            last_heartbeat: None,
        }
    }

    pub fn pin(&self) -> u8 {
        self.cfg.pin
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn is_armed(&self) -> bool {
        self.edge.is_armed()
    }

    pub fn hardware_fault(&self) -> bool {
        self.hardware_fault
    }

    fn pull(&self) -> Pull {
        if self.cfg.pullup { Pull::Up } else { Pull::Down }
    }

    fn logical(&self, raw: Level) -> Level {
        if self.cfg.invert { raw.inverted() } else { raw }
    }

    /// Release, configure as input, settle, read the baseline and disarm.
    pub fn init(&mut self) -> Result<Level, CounterError> {
        self.initialised = false;
        self.edge.disarm();
        if let Err(e) = self.io.release(&[self.cfg.pin]) {
            tracing::debug!(pin = self.cfg.pin, error = %e, "sensor release before init failed");
        }
        let pull = self.pull();
        self.io
            .configure_pin(self.cfg.pin, PinDirection::Input, pull)
            .map_err(|e| map_hw_error(&*e))?;
        self.clock.sleep(self.cfg.settle);
        let raw = self.io.read(self.cfg.pin).map_err(|e| map_hw_error(&*e))?;
        let level = self.logical(raw);
        self.last_level = Some(level);
        self.consecutive_errors = 0;
        self.initialised = true;
        self.next_init_at = None;
        tracing::info!(pin = self.cfg.pin, ?level, pullup = self.cfg.pullup, invert = self.cfg.invert, "sensor initialised");
        Ok(level)
    }

    /// Rate-limited re-initialisation.
    ///
    /// Within the cooldown window after the last attempt each request counts
    /// against `max_reinit_attempts`; past the limit the request is refused and
    /// the hardware-fault flag is latched. Outside the window the count resets.
    pub fn request_reinit(&mut self) -> Result<(), CounterError> {
        let now = self.clock.now();
        match self.last_reinit_at {
            Some(at) if now.saturating_duration_since(at) < self.cfg.reinit_cooldown => {
                self.reinit_attempts += 1;
                if self.reinit_attempts > self.cfg.max_reinit_attempts {
                    if !self.hardware_fault {
                        tracing::error!(
                            pin = self.cfg.pin,
                            attempts = self.reinit_attempts,
                            "sensor reinit limit exceeded; hardware fault"
                        );
                    }
                    self.hardware_fault = true;
                    return Err(CounterError::HardwareFault(format!(
                        "sensor pin {} exceeded {} reinit attempts",
                        self.cfg.pin, self.cfg.max_reinit_attempts
                    )));
                }
            }
            _ => self.reinit_attempts = 0,
        }
        self.last_reinit_at = Some(now);
        tracing::warn!(pin = self.cfg.pin, attempt = self.reinit_attempts, "reinitialising sensor");
        match self.init() {
            Ok(_) => {
                self.hardware_fault = false;
                Ok(())
            }
            Err(e) => {
                self.next_init_at = Some(now + self.cfg.init_retry);
                tracing::error!(pin = self.cfg.pin, error = %e, "sensor reinit failed");
                Err(e)
            }
        }
    }

    /// One poll tick. Reads only while `counting`.
    pub fn poll(&mut self, counting: bool) -> PollOutcome {
        if !self.initialised {
            let now = self.clock.now();
            if self.next_init_at.is_none_or(|at| now >= at) {
                if let Err(e) = self.init() {
                    self.next_init_at = Some(now + self.cfg.init_retry);
                    tracing::warn!(pin = self.cfg.pin, error = %e, "sensor init failed; will retry");
                }
            }
            return PollOutcome::NotReady;
        }
        if !counting {
            return PollOutcome::Skipped;
        }
        match self.io.read(self.cfg.pin) {
            Ok(raw) => {
                self.consecutive_errors = 0;
                let level = self.logical(raw);
                if self.last_level != Some(level) {
                    tracing::trace!(pin = self.cfg.pin, ?level, "sensor level change");
                }
                self.last_level = Some(level);
                if self.edge.feed(level) {
                    PollOutcome::Item
                } else {
                    PollOutcome::Idle
                }
            }
            Err(e) => {
                self.consecutive_errors += 1;
                tracing::warn!(
                    pin = self.cfg.pin,
                    errors = self.consecutive_errors,
                    error = %e,
                    "sensor read failed"
                );
                if self.consecutive_errors >= self.cfg.max_read_errors {
                    self.consecutive_errors = 0;
                    if self.request_reinit().is_ok() {
                        return PollOutcome::Reinitialized;
                    }
                }
                PollOutcome::ReadError
            }
        }
    }

    /// Operator reconfiguration. A pull change reinitialises the pin; the
    /// edge detector is always disarmed.
    pub fn configure(&mut self, invert: Option<bool>, pullup: Option<bool>) -> Result<(), CounterError> {
        if let Some(inv) = invert {
            self.cfg.invert = inv;
        }
        let pull_changed = pullup.is_some_and(|p| p != self.cfg.pullup);
        if let Some(p) = pullup {
            self.cfg.pullup = p;
        }
        self.edge.disarm();
        if pull_changed {
            self.hardware_fault = false;
            self.init()?;
        }
        tracing::info!(pin = self.cfg.pin, invert = self.cfg.invert, pullup = self.cfg.pullup, "sensor reconfigured");
        Ok(())
    }

    /// True once per heartbeat interval.
    pub fn heartbeat_due(&mut self) -> bool {
        let now = self.clock.now();
        match self.last_heartbeat {
            Some(at) if now.saturating_duration_since(at) < HEARTBEAT_INTERVAL => false,
            _ => {
                self.last_heartbeat = Some(now);
                true
            }
        }
    }

    pub fn diagnostics(&self) -> SensorDiagnostics {
        SensorDiagnostics {
            pin: self.cfg.pin,
            level: if self.initialised {
                self.last_level.map(|l| u8::from(l.is_high()))
            } else {
                None
            },
            armed: self.edge.is_armed(),
            pullup: self.cfg.pullup,
            invert: self.cfg.invert,
            consecutive_errors: self.consecutive_errors,
            initialised: self.initialised,
            hardware_fault: self.hardware_fault,
            reinit_attempts: self.reinit_attempts,
        }
    }

    pub fn release(&mut self) -> Result<(), CounterError> {
        self.initialised = false;
        self.io.release(&[self.cfg.pin]).map_err(|e| map_hw_error(&*e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counter_hardware::SimulatedIo;
    use counter_traits::clock::test_clock::TestClock;
    use std::time::Duration;

    fn monitor(sim: &SimulatedIo) -> (TestClock, SensorMonitor<SimulatedIo>) {
        let clock = TestClock::new();
        let cfg = SensorCfg {
            pin: 22,
            ..SensorCfg::default()
        };
        (clock.clone(), SensorMonitor::new(sim.clone(), cfg, Arc::new(clock)))
    }

    #[test]
    fn init_reads_baseline_and_disarms() {
        let sim = SimulatedIo::new();
        let (_clock, mut m) = monitor(&sim);
        assert_eq!(m.init().unwrap(), Level::High);
        assert!(m.is_initialised());
        assert!(!m.is_armed());
        assert_eq!(sim.pull(22), Some(Pull::Up));
    }

    #[test]
    fn paused_poll_leaves_pin_alone() {
        let sim = SimulatedIo::new();
        let (_clock, mut m) = monitor(&sim);
        m.init().unwrap();
        sim.push_levels(22, [Level::Low]);
        assert_eq!(m.poll(false), PollOutcome::Skipped);
        // scripted level still pending
        assert_eq!(m.poll(true), PollOutcome::Idle);
    }

    #[test]
    fn pulse_yields_one_item() {
        let sim = SimulatedIo::new();
        let (_clock, mut m) = monitor(&sim);
        m.init().unwrap();
        sim.push_levels(22, [Level::High, Level::High, Level::Low, Level::Low]);
        sim.set_level(22, Level::Low);
        let items = (0..6).filter(|_| m.poll(true) == PollOutcome::Item).count();
        assert_eq!(items, 1);
    }

    #[test]
    fn invert_flips_logic() {
        let sim = SimulatedIo::new();
        let (_clock, mut m) = monitor(&sim);
        m.init().unwrap();
        m.configure(Some(true), None).unwrap();
        // raw low-then-high is a logical high-then-low pulse
        sim.push_levels(22, [Level::Low, Level::High]);
        assert_eq!(m.poll(true), PollOutcome::Idle);
        assert_eq!(m.poll(true), PollOutcome::Item);
    }

    #[test]
    fn pull_change_reinitialises() {
        let sim = SimulatedIo::new();
        let (_clock, mut m) = monitor(&sim);
        m.init().unwrap();
        let n = sim.configure_count(22);
        m.configure(None, Some(false)).unwrap();
        assert_eq!(sim.configure_count(22), n + 1);
        assert_eq!(sim.pull(22), Some(Pull::Down));
        // unchanged pull does not touch the pin
        m.configure(None, Some(false)).unwrap();
        assert_eq!(sim.configure_count(22), n + 1);
    }

    #[test]
    fn failed_init_retries_on_schedule() {
        let sim = SimulatedIo::new();
        let (clock, mut m) = monitor(&sim);
        sim.fail_next_configures(22, 1);
        assert_eq!(m.poll(true), PollOutcome::NotReady);
        assert!(!m.is_initialised());
        // before the retry delay nothing happens
        clock.advance(Duration::from_secs(1));
        assert_eq!(m.poll(true), PollOutcome::NotReady);
        assert!(!m.is_initialised());
        clock.advance(Duration::from_secs(5));
        assert_eq!(m.poll(true), PollOutcome::NotReady);
        assert!(m.is_initialised());
    }

    #[test]
    fn reinit_limit_latches_hardware_fault() {
        let sim = SimulatedIo::new();
        let (_clock, mut m) = monitor(&sim);
        m.init().unwrap();
        // first request resets the counter, the next five are allowed
        for _ in 0..6 {
            m.request_reinit().unwrap();
        }
        assert!(!m.hardware_fault());
        assert!(m.request_reinit().is_err());
        assert!(m.hardware_fault());
        assert!(m.diagnostics().hardware_fault);
    }

    #[test]
    fn reinit_counter_resets_after_cooldown() {
        let sim = SimulatedIo::new();
        let (clock, mut m) = monitor(&sim);
        m.init().unwrap();
        for _ in 0..6 {
            m.request_reinit().unwrap();
        }
        clock.advance(Duration::from_secs(61));
        m.request_reinit().unwrap();
        assert_eq!(m.diagnostics().reinit_attempts, 0);
    }

    #[test]
    fn heartbeat_once_per_interval() {
        let sim = SimulatedIo::new();
        let (clock, mut m) = monitor(&sim);
        assert!(m.heartbeat_due());
        assert!(!m.heartbeat_due());
        clock.advance(Duration::from_secs(31));
        assert!(m.heartbeat_due());
    }
}
