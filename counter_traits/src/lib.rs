pub mod clock;

pub use clock::{Clock, MonotonicClock};

pub type IoError = Box<dyn std::error::Error + Send + Sync>;

/// Logical level of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    #[inline]
    pub fn is_high(self) -> bool {
        matches!(self, Level::High)
    }

    #[inline]
    pub fn inverted(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
}

/// Internal bias resistor selection for input pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    None,
    Up,
    Down,
}

/// Pin-level digital I/O capability (GPIO header, expander, simulator).
///
/// `release` must accept pins that were never configured or were already released.
pub trait DigitalIo {
    fn configure_pin(&mut self, pin: u8, direction: PinDirection, pull: Pull)
    -> Result<(), IoError>;
    fn read(&mut self, pin: u8) -> Result<Level, IoError>;
    fn write(&mut self, pin: u8, level: Level) -> Result<(), IoError>;
    fn release(&mut self, pins: &[u8]) -> Result<(), IoError>;
}

impl<T: DigitalIo + ?Sized> DigitalIo for Box<T> {
    fn configure_pin(
        &mut self,
        pin: u8,
        direction: PinDirection,
        pull: Pull,
    ) -> Result<(), IoError> {
        (**self).configure_pin(pin, direction, pull)
    }
    fn read(&mut self, pin: u8) -> Result<Level, IoError> {
        (**self).read(pin)
    }
    fn write(&mut self, pin: u8, level: Level) -> Result<(), IoError> {
        (**self).write(pin, level)
    }
    fn release(&mut self, pins: &[u8]) -> Result<(), IoError> {
        (**self).release(pins)
    }
}
