//! Shared handle over one `DigitalIo` so the sensor loop, the door and
//! shutdown can all reach the same pin bank.
use std::sync::Arc;

use counter_traits::{DigitalIo, IoError, Level, PinDirection, Pull};
use parking_lot::Mutex;

/// The inner lock is a leaf: nothing else is acquired while it is held.
#[derive(Clone)]
pub struct SharedIo {
    inner: Arc<Mutex<Box<dyn DigitalIo + Send>>>,
}

impl SharedIo {
    pub fn new<I: DigitalIo + Send + 'static>(io: I) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(io))),
        }
    }
}

impl core::fmt::Debug for SharedIo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedIo").finish_non_exhaustive()
    }
}

impl DigitalIo for SharedIo {
    fn configure_pin(
        &mut self,
        pin: u8,
        direction: PinDirection,
        pull: Pull,
    ) -> Result<(), IoError> {
        self.inner.lock().configure_pin(pin, direction, pull)
    }

    fn read(&mut self, pin: u8) -> Result<Level, IoError> {
        self.inner.lock().read(pin)
    }

    fn write(&mut self, pin: u8, level: Level) -> Result<(), IoError> {
        self.inner.lock().write(pin, level)
    }

    fn release(&mut self, pins: &[u8]) -> Result<(), IoError> {
        self.inner.lock().release(pins)
    }
}
