//! Maps `Box<dyn Error>` from trait boundaries to typed `CounterError`.
//!
//! `DigitalIo` and `OrderSink` use `Box<dyn Error + Send + Sync>`; this module
//! converts those to the engine's error enum, with a feature-gated path for
//! `counter_hardware::HwError` downcasting.

use crate::error::CounterError;

/// Map a pin-level error to a typed `CounterError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> CounterError {
    #[cfg(feature = "hardware-errors")]
    {
        use counter_hardware::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::PinNotConfigured(pin) => {
                    CounterError::HardwareFault(format!("pin {pin} not configured"))
                }
                other => CounterError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("permission") {
        CounterError::HardwareFault(format!("{s} (is the process in the gpio group?)"))
    } else {
        CounterError::HardwareFault(s)
    }
}

/// Map an order-sink error. Sink errors are never hardware faults.
pub fn map_sink_error(e: &(dyn std::error::Error + 'static)) -> CounterError {
    CounterError::SinkFault(e.to_string())
}
