//! Driver error types.
//!
//! Every device adapter reports failures as a [`DriverError`]: the name of the
//! device that failed, a coarse [`DriverErrorKind`] the queue runner can act
//! on, and a human-readable message. Adapters absorb transient I/O glitches
//! themselves (bounded retries) and only surface errors that should stop a
//! worklist.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Broad category of a device failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The device is absent, unplugged, or was never opened.
    Connection,
    /// The link is up but a request/response exchange failed.
    Communication,
    /// The device did not answer or finish within the allotted time.
    Timeout,
    /// A response arrived but could not be decoded.
    Parse,
    /// The device reported a fault of its own.
    Hardware,
    /// The request was refused before reaching the hardware.
    InvalidParameter,
    /// The driver configuration is unusable.
    Configuration,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Connection => "connection",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Parse => "parse",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Configuration => "configuration",
        };
        write!(f, "{}", label)
    }
}

/// Structured error returned by every capability trait method.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Device '{device}' {kind} error: {message}")]
pub struct DriverError {
    /// Name of the device that produced the error.
    pub device: String,
    /// Error category.
    pub kind: DriverErrorKind,
    /// Details.
    pub message: String,
}

impl DriverError {
    /// Build an error from its parts.
    pub fn new(device: impl Into<String>, kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            kind,
            message: message.into(),
        }
    }

    /// The device is not connected.
    pub fn not_connected(device: impl Into<String>) -> Self {
        Self::new(device, DriverErrorKind::Connection, "device is not connected")
    }

    /// Wrap an I/O failure from the transport.
    pub fn io(device: impl Into<String>, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => DriverErrorKind::Timeout,
            std::io::ErrorKind::NotFound
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof => DriverErrorKind::Connection,
            _ => DriverErrorKind::Communication,
        };
        Self::new(device, kind, err.to_string())
    }

    /// Whether the error means the device cannot be reached at all.
    pub fn is_connection(&self) -> bool {
        self.kind == DriverErrorKind::Connection
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            DriverErrorKind::Communication | DriverErrorKind::Timeout
        )
    }
}

/// Result alias for device adapter calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;
