use thiserror::Error;

/// Pin backend failures, boxed across the `DigitalIo` boundary and
/// recovered by `counter_core::hw_error::map_hw_error`.
#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("pin {0} not configured")]
    PinNotConfigured(u8),
    #[error("pin {pin} is not configured as {expected}")]
    WrongDirection { pin: u8, expected: &'static str },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
