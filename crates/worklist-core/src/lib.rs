//! Core types and traits for lab_worklist.
//!
//! - [`capabilities`]: one async trait per instrument kind the worklist drives
//! - [`driver`]: [`DriverFactory`](driver::DriverFactory) and the capability bag it returns
//! - [`error`]: [`DriverError`](error::DriverError) and its kinds
//! - [`retry`]: bounded fixed-backoff retry for transport errors
//! - [`types`]: positions, controller states, spectrometer and source-meter value types
//! - `serial` (feature `serial`): shared async serial port helpers

pub mod capabilities;
pub mod driver;
pub mod error;
pub mod retry;
#[cfg(feature = "serial")]
pub mod serial;
pub mod types;

pub use error::{DriverError, DriverErrorKind, DriverResult};
