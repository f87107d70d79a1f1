#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Bottle-line counting engine (hardware-agnostic).
//!
//! All pin access goes through `counter_traits::DigitalIo`, all time through
//! `counter_traits::Clock` and all order bookkeeping through [`sink::OrderSink`].
//!
//! ## Architecture
//!
//! - **Edge detection**: two-state Idle/Armed detector (`edge` module)
//! - **Sensing**: polled sensor with read-error recovery (`sensor` module)
//! - **Door**: idempotent gate actuator with one reconfigure-and-retry (`door` module)
//! - **State machine**: Stopped/Counting/Paused with a reentrant state lock and a
//!   separate tally lock, state before tally (`machine` module)
//! - **Persistence**: key=value recovery snapshot, atomic replace (`persistence` module)
//! - **Statistics**: 5 s throughput windows and bounded history (`stats` module)
//! - **Watchdog**: auto-pause on prolonged idle (`watchdog` module)
//! - **Side effects**: bounded job queue drained off the poll path (`dispatch` module)
//! - **Assembly**: `ControllerBuilder`/`Controller` spawn and join the loops (`controller`)
//! - **Control surface**: `ControlApi` turns every operation into an `ApiReply` (`api`)

pub mod api;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod dispatch;
pub mod door;
pub mod edge;
pub mod error;
pub mod hw_error;
pub mod io;
pub mod machine;
pub mod mocks;
pub mod persistence;
pub mod sensor;
pub mod sink;
pub mod state;
pub mod stats;
pub mod util;
pub mod watchdog;
pub mod worker;

pub use api::{ApiReply, ControlApi, StatusReport};
pub use controller::{Controller, ControllerBuilder};
pub use error::{BuildError, CounterError};
pub use machine::CounterMachine;
pub use state::Phase;
