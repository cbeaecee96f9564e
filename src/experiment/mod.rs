//! Worklist model and execution.
//!
//! - [`command`]: the queued actions and their parameters
//! - [`format`]: the line-oriented text format for saved worklists
//! - [`queue`]: the ordered command list with its execution cursor
//! - [`run_engine`]: the runner that executes a queue against live instruments
//! - [`sweeps`]: generators for common measurement sequences

pub mod command;
pub mod completion;
pub mod format;
pub mod journal;
pub mod queue;
pub mod ramp;
pub mod run_engine;
pub mod state;
pub mod sweeps;

pub use command::{
    Command, CommandAction, CommandKind, CommandState, PositionTag, RampLeg, RotatorModel,
    RotatorRole, TranslateMode,
};
pub use queue::CommandQueue;
pub use run_engine::{QueueRunner, RunEvent, RunReport, RunnerSettings};
pub use state::{RunOutcome, RunnerState};
