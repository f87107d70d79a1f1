use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use counter_traits::{DigitalIo, IoError, Level, PinDirection, Pull};

use crate::error::HwError;

#[derive(Debug, Default)]
struct SimPin {
    direction: Option<PinDirection>,
    pull: Option<Pull>,
    /// Level returned once `script` runs dry (or written level for outputs).
    level: Option<Level>,
    script: VecDeque<Level>,
    configure_count: u32,
}

#[derive(Debug, Default)]
struct SimState {
    pins: HashMap<u8, SimPin>,
    pending_read_errors: HashMap<u8, u32>,
    fail_reads: HashMap<u8, bool>,
    pending_write_errors: HashMap<u8, u32>,
    fail_configure: HashMap<u8, u32>,
    writes: Vec<(u8, Level)>,
    released: Vec<u8>,
}

/// In-memory digital I/O for tests and bench runs without a GPIO header.
///
/// Clones share the same pin table so a test can keep a handle while the
/// controller owns another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedIo {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedIo {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        // a poisoned simulator is still usable for assertions
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Set the steady level a pin reports when no scripted levels remain.
    pub fn set_level(&self, pin: u8, level: Level) {
        self.state().pins.entry(pin).or_default().level = Some(level);
    }

    /// Queue levels returned by successive reads before falling back to the steady level.
    pub fn push_levels<I: IntoIterator<Item = Level>>(&self, pin: u8, levels: I) {
        self.state().pins.entry(pin).or_default().script.extend(levels);
    }

    /// The next `n` reads of `pin` fail.
    pub fn fail_next_reads(&self, pin: u8, n: u32) {
        *self.state().pending_read_errors.entry(pin).or_insert(0) += n;
    }

    /// Every read of `pin` fails until cleared.
    pub fn set_read_failing(&self, pin: u8, failing: bool) {
        self.state().fail_reads.insert(pin, failing);
    }

    pub fn fail_next_writes(&self, pin: u8, n: u32) {
        *self.state().pending_write_errors.entry(pin).or_insert(0) += n;
    }

    pub fn fail_next_configures(&self, pin: u8, n: u32) {
        *self.state().fail_configure.entry(pin).or_insert(0) += n;
    }

    pub fn writes(&self) -> Vec<(u8, Level)> {
        self.state().writes.clone()
    }

    pub fn writes_to(&self, pin: u8) -> Vec<Level> {
        self.state()
            .writes
            .iter()
            .filter(|(p, _)| *p == pin)
            .map(|(_, l)| *l)
            .collect()
    }

    pub fn output_level(&self, pin: u8) -> Option<Level> {
        let st = self.state();
        let p = st.pins.get(&pin)?;
        match p.direction {
            Some(PinDirection::Output) => p.level,
            _ => None,
        }
    }

    pub fn direction(&self, pin: u8) -> Option<PinDirection> {
        self.state().pins.get(&pin).and_then(|p| p.direction)
    }

    pub fn pull(&self, pin: u8) -> Option<Pull> {
        self.state().pins.get(&pin).and_then(|p| p.pull)
    }

    pub fn configure_count(&self, pin: u8) -> u32 {
        self.state()
            .pins
            .get(&pin)
            .map_or(0, |p| p.configure_count)
    }

    pub fn released(&self) -> Vec<u8> {
        self.state().released.clone()
    }
}

fn take_one(map: &mut HashMap<u8, u32>, pin: u8) -> bool {
    match map.get_mut(&pin) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

impl DigitalIo for SimulatedIo {
    fn configure_pin(
        &mut self,
        pin: u8,
        direction: PinDirection,
        pull: Pull,
    ) -> Result<(), IoError> {
        let mut st = self.state();
        if take_one(&mut st.fail_configure, pin) {
            return Err(Box::new(HwError::Gpio(format!(
                "simulated configure failure on pin {pin}"
            ))));
        }
        let p = st.pins.entry(pin).or_default();
        p.direction = Some(direction);
        p.pull = Some(pull);
        p.configure_count += 1;
        if direction == PinDirection::Output {
            p.level = Some(Level::Low);
        } else if p.level.is_none() {
            p.level = Some(match pull {
                Pull::Down => Level::Low,
                Pull::Up | Pull::None => Level::High,
            });
        }
        tracing::trace!(pin, ?direction, ?pull, "sim configure");
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<Level, IoError> {
        let mut st = self.state();
        if st.fail_reads.get(&pin).copied().unwrap_or(false)
            || take_one(&mut st.pending_read_errors, pin)
        {
            return Err(Box::new(HwError::Gpio(format!(
                "simulated read failure on pin {pin}"
            ))));
        }
        let Some(p) = st.pins.get_mut(&pin) else {
            return Err(Box::new(HwError::PinNotConfigured(pin)));
        };
        if p.direction.is_none() {
            return Err(Box::new(HwError::PinNotConfigured(pin)));
        }
        if let Some(l) = p.script.pop_front() {
            return Ok(l);
        }
        Ok(p.level.unwrap_or(Level::Low))
    }

    fn write(&mut self, pin: u8, level: Level) -> Result<(), IoError> {
        let mut st = self.state();
        if take_one(&mut st.pending_write_errors, pin) {
            return Err(Box::new(HwError::Gpio(format!(
                "simulated write failure on pin {pin}"
            ))));
        }
        let p = st.pins.entry(pin).or_default();
        match p.direction {
            Some(PinDirection::Output) => p.level = Some(level),
            Some(PinDirection::Input) => {
                return Err(Box::new(HwError::WrongDirection {
                    pin,
                    expected: "output",
                }));
            }
            None => return Err(Box::new(HwError::PinNotConfigured(pin))),
        }
        st.writes.push((pin, level));
        tracing::trace!(pin, ?level, "sim write");
        Ok(())
    }

    fn release(&mut self, pins: &[u8]) -> Result<(), IoError> {
        let mut st = self.state();
        for pin in pins {
            if let Some(p) = st.pins.get_mut(pin) {
                p.direction = None;
                p.pull = None;
            }
            st.released.push(*pin);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_starts_low_after_configure() {
        let mut io = SimulatedIo::new();
        io.configure_pin(23, PinDirection::Output, Pull::None).unwrap();
        assert_eq!(io.output_level(23), Some(Level::Low));
    }

    #[test]
    fn pullup_input_idles_high() {
        let mut io = SimulatedIo::new();
        io.configure_pin(22, PinDirection::Input, Pull::Up).unwrap();
        assert_eq!(io.read(22).unwrap(), Level::High);
    }
}
