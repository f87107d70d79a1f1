use std::collections::HashMap;

use counter_traits::{DigitalIo, IoError, Level, PinDirection, Pull};
use rppal::gpio::{self, Gpio, InputPin, OutputPin};

use crate::error::HwError;

enum Line {
    Input(InputPin),
    Output(OutputPin),
}

/// Raspberry Pi GPIO header via rppal. Pins are reset to their prior mode on drop.
pub struct RppalIo {
    gpio: Gpio,
    lines: HashMap<u8, Line>,
}

impl RppalIo {
    pub fn new() -> Result<Self, HwError> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        Ok(Self {
            gpio,
            lines: HashMap::new(),
        })
    }
}

fn to_rppal(level: Level) -> gpio::Level {
    match level {
        Level::Low => gpio::Level::Low,
        Level::High => gpio::Level::High,
    }
}

impl DigitalIo for RppalIo {
    fn configure_pin(
        &mut self,
        pin: u8,
        direction: PinDirection,
        pull: Pull,
    ) -> Result<(), IoError> {
        // drop any previous handle first so the pin can be re-acquired
        self.lines.remove(&pin);
        let p = self
            .gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(format!("pin {pin}: {e}")))?;
        let line = match direction {
            PinDirection::Output => Line::Output(p.into_output_low()),
            PinDirection::Input => Line::Input(match pull {
                Pull::Up => p.into_input_pullup(),
                Pull::Down => p.into_input_pulldown(),
                Pull::None => p.into_input(),
            }),
        };
        self.lines.insert(pin, line);
        tracing::debug!(pin, ?direction, ?pull, "gpio configured");
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<Level, IoError> {
        match self.lines.get(&pin) {
            Some(Line::Input(p)) => Ok(Level::from(p.is_high())),
            Some(Line::Output(p)) => Ok(Level::from(p.is_set_high())),
            None => Err(Box::new(HwError::PinNotConfigured(pin))),
        }
    }

    fn write(&mut self, pin: u8, level: Level) -> Result<(), IoError> {
        match self.lines.get_mut(&pin) {
            Some(Line::Output(p)) => {
                p.write(to_rppal(level));
                Ok(())
            }
            Some(Line::Input(_)) => Err(Box::new(HwError::WrongDirection {
                pin,
                expected: "output",
            })),
            None => Err(Box::new(HwError::PinNotConfigured(pin))),
        }
    }

    fn release(&mut self, pins: &[u8]) -> Result<(), IoError> {
        for pin in pins {
            self.lines.remove(pin);
        }
        Ok(())
    }
}
