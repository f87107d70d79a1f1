pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod rpi;
mod simulated;

pub use error::HwError;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use rpi::RppalIo;
pub use simulated::SimulatedIo;
