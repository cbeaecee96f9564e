//! # Lab Worklist
//!
//! Sequential command queue for an optical spectroscopy setup. A worklist
//! mixes rotator moves, temperature setpoints, stage moves, spectrometer
//! scans and exports, and source meter ramps; the runner executes them one
//! at a time, waiting for each instrument to report completion.
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-backed configuration (TOML file plus
//!   `WORKLIST_` environment overrides).
//! - **`error`**: the `WorklistError` enum used across the crate.
//! - **`experiment`**: commands, the text format, the queue and its runner,
//!   and sweep generators.
//! - **`instruments`**: the role-keyed instrument set and the factory
//!   registry that builds it from configuration.
//! - **`logging`**: tracing subscriber setup.
//!
//! Device adapters live in the `worklist-driver-*` crates and implement the
//! capability traits from `worklist-core`.

pub mod config;
pub mod error;
pub mod experiment;
pub mod instruments;
pub mod logging;

pub use config::WorklistConfig;
pub use error::{WorklistError, WorklistResult};
pub use experiment::{Command, CommandQueue, QueueRunner, RunEvent, RunOutcome, RunnerSettings};
pub use instruments::{InstrumentRole, Instruments, InstrumentsBuilder};
