//! Gate actuator: idempotent open/close with one reconfigure-and-retry.
use counter_traits::{DigitalIo, Level, PinDirection, Pull};

use crate::error::CounterError;
use crate::hw_error::map_hw_error;

#[derive(Debug)]
pub struct DoorActuator<I: DigitalIo> {
    io: I,
    pin: u8,
    /// Last commanded state confirmed by a successful write.
    open: bool,
}

impl<I: DigitalIo> DoorActuator<I> {
    pub fn new(io: I, pin: u8) -> Self {
        Self {
            io,
            pin,
            open: false,
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Configure the pin as an output driven closed.
    pub fn init(&mut self) -> Result<(), CounterError> {
        self.io
            .configure_pin(self.pin, PinDirection::Output, Pull::None)
            .map_err(|e| map_hw_error(&*e))?;
        self.write_with_retry(false)
    }

    pub fn open(&mut self) -> Result<bool, CounterError> {
        self.set(true)
    }

    pub fn close(&mut self) -> Result<bool, CounterError> {
        self.set(false)
    }

    /// Drive to `open` unless already there. Returns whether a write happened.
    pub fn set(&mut self, open: bool) -> Result<bool, CounterError> {
        if self.open == open {
            return Ok(false);
        }
        self.write_with_retry(open)?;
        Ok(true)
    }

    /// Force a write regardless of the last known state; used after restarts.
    pub fn sync(&mut self, open: bool) -> Result<(), CounterError> {
        self.write_with_retry(open)
    }

    fn write_with_retry(&mut self, open: bool) -> Result<(), CounterError> {
        let level = Level::from(open);
        let first = match self.io.write(self.pin, level) {
            Ok(()) => {
                self.open = open;
                tracing::debug!(pin = self.pin, open, "door actuated");
                return Ok(());
            }
            Err(e) => e,
        };
        tracing::warn!(pin = self.pin, open, error = %first, "door write failed, reconfiguring");
        let retry = self
            .io
            .configure_pin(self.pin, PinDirection::Output, Pull::None)
            .and_then(|()| self.io.write(self.pin, level));
        match retry {
            Ok(()) => {
                self.open = open;
                tracing::info!(pin = self.pin, open, "door actuated after retry");
                Ok(())
            }
            Err(e) => {
                let mapped = map_hw_error(&*e);
                tracing::error!(pin = self.pin, open, error = %mapped, "door actuation failed");
                Err(CounterError::DoorFault(mapped.to_string()))
            }
        }
    }

    /// Hand the pin back to the platform.
    pub fn release(&mut self) -> Result<(), CounterError> {
        self.io.release(&[self.pin]).map_err(|e| map_hw_error(&*e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counter_hardware::SimulatedIo;

    fn door() -> (SimulatedIo, DoorActuator<SimulatedIo>) {
        let sim = SimulatedIo::new();
        let mut d = DoorActuator::new(sim.clone(), 23);
        d.init().unwrap();
        (sim, d)
    }

    #[test]
    fn repeated_open_writes_once() {
        let (sim, mut d) = door();
        let before = sim.writes_to(23).len();
        assert!(d.open().unwrap());
        assert!(!d.open().unwrap());
        assert_eq!(sim.writes_to(23).len(), before + 1);
        assert!(d.close().unwrap());
        assert!(!d.close().unwrap());
        assert_eq!(sim.writes_to(23).len(), before + 2);
    }

    #[test]
    fn single_failure_is_retried_after_reconfigure() {
        let (sim, mut d) = door();
        let configs = sim.configure_count(23);
        sim.fail_next_writes(23, 1);
        assert!(d.open().unwrap());
        assert!(d.is_open());
        assert_eq!(sim.configure_count(23), configs + 1);
        assert_eq!(sim.output_level(23), Some(Level::High));
    }

    #[test]
    fn second_failure_is_a_door_fault_and_state_is_kept() {
        let (sim, mut d) = door();
        sim.fail_next_writes(23, 2);
        let err = d.open().expect_err("two failures");
        assert!(matches!(err, CounterError::DoorFault(_)));
        assert!(!d.is_open());
        // next actuation corrects the mismatch
        assert!(d.open().unwrap());
        assert_eq!(sim.output_level(23), Some(Level::High));
    }

    #[test]
    fn sync_always_writes() {
        let (sim, mut d) = door();
        let before = sim.writes_to(23).len();
        d.sync(false).unwrap();
        assert_eq!(sim.writes_to(23).len(), before + 1);
    }
}
