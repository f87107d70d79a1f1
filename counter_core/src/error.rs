use thiserror::Error;

use crate::state::Phase;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CounterError {
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("door fault: {0}")]
    DoorFault(String),
    #[error("cannot {op} while {phase}")]
    InvalidTransition { op: &'static str, phase: Phase },
    #[error("an active order already exists")]
    DuplicateOrder,
    #[error("no order configured")]
    OrderNotConfigured,
    #[error("an order is already configured")]
    AlreadyConfigured,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("persistence fault: {0}")]
    PersistenceFault(String),
    #[error("order sink fault: {0}")]
    SinkFault(String),
}

impl CounterError {
    /// True for rejections caused by the caller rather than by a fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::DuplicateOrder
                | Self::OrderNotConfigured
                | Self::AlreadyConfigured
                | Self::InvalidArgument(_)
        )
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing digital io")]
    MissingIo,
    #[error("missing order sink")]
    MissingSink,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
