//! Runner lifecycle state and run outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the queue runner.
///
/// # State Machine
///
/// ```text
/// Idle ──run()──> Running ──last command done──> Idle
///                    │                            ▲
///                 stop()                          │
///                    ▼                            │
///                 Stopping ──current command done─┘
/// ```
///
/// A failed command also returns the runner to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunnerState {
    /// No run in progress; the worklist can be edited
    #[default]
    Idle,
    /// Executing commands
    Running,
    /// Finishing the current command before ending the run
    Stopping,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Idle => write!(f, "Idle"),
            RunnerState::Running => write!(f, "Running"),
            RunnerState::Stopping => write!(f, "Stopping"),
        }
    }
}

impl RunnerState {
    /// Whether a new run may start.
    pub fn can_begin(&self) -> bool {
        matches!(self, RunnerState::Idle)
    }

    /// Whether a run is in progress, stopping or not.
    pub fn is_active(&self) -> bool {
        !self.can_begin()
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every command finished
    Completed,
    /// Stopped on request after the command in progress finished
    Stopped,
    /// A command failed
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Stopped => write!(f, "stopped"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}
