//! Error types for the worklist runtime.
//!
//! `WorklistError` covers everything above the device layer:
//!
//! - **Run state**: [`EmptyQueue`](WorklistError::EmptyQueue),
//!   [`RunInProgress`](WorklistError::RunInProgress) and
//!   [`NotRunning`](WorklistError::NotRunning) are returned when an operation
//!   does not fit the runner's current state. Nothing is changed.
//! - **Worklist files**: [`Format`](WorklistError::Format) names the 1-based
//!   line that could not be parsed.
//! - **Execution**: [`CommandFailed`](WorklistError::CommandFailed) wraps the
//!   [`DriverError`] that stopped a run, with the command's position and label.
//! - **Configuration**: figment extraction errors and semantic validation.
//!
//! Device failures stay typed as [`DriverError`] until they reach the runner.

use thiserror::Error;
use worklist_core::error::DriverError;

/// Convenience alias for results using the worklist error type.
pub type WorklistResult<T> = std::result::Result<T, WorklistError>;

#[derive(Error, Debug)]
pub enum WorklistError {
    #[error("Cannot run an empty worklist")]
    EmptyQueue,

    #[error("A run is in progress; the worklist cannot be changed")]
    RunInProgress,

    #[error("No run is in progress")]
    NotRunning,

    #[error("Worklist line {line}: {message}")]
    Format { line: usize, message: String },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Command {index} ({label}) failed: {source}")]
    CommandFailed {
        index: usize,
        label: String,
        #[source]
        source: DriverError,
    },

    #[error("Instrument for {0} is not configured")]
    MissingInstrument(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for WorklistError {
    fn from(err: figment::Error) -> Self {
        WorklistError::Config(Box::new(err))
    }
}

impl WorklistError {
    /// Shorthand for a parse error on a 1-based line.
    pub fn format(line: usize, message: impl Into<String>) -> Self {
        WorklistError::Format {
            line,
            message: message.into(),
        }
    }
}
