//! Device Capabilities
//!
//! One small trait per kind of instrument a worklist can drive. The queue
//! runner never sees a concrete driver; it only talks to these traits, so a
//! serial rotator, a simulated one and a test double are interchangeable.
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Reports failures as [`DriverError`](crate::error::DriverError)
//! - Exposes a synchronous `is_connected()` flag checked before every command
//!
//! Adapters absorb transient I/O errors internally. A reply that cannot be
//! parsed is not an error: readings come back as `None` and the caller keeps
//! polling.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn rotate_and_wait(rotator: &dyn Rotator, degrees: f64) -> DriverResult<()> {
//!     rotator.move_abs(degrees).await?;
//!     while !rotator.controller_state().await?.is_ready() {
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::DriverResult;
use crate::types::{
    ExperimentSlot, ExportRequest, Illumination, Position3, RotatorState, ScanMode, SourceMode,
};
use async_trait::async_trait;

// =============================================================================
// Rotator
// =============================================================================

/// Motorised rotation mount (polarizer or analyzer).
#[async_trait]
pub trait Rotator: Send + Sync {
    /// Device name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the device link is up.
    fn is_connected(&self) -> bool;

    /// Start an absolute move. Returns once the controller accepted it.
    async fn move_abs(&self, degrees: f64) -> DriverResult<()>;

    /// Current controller state.
    async fn controller_state(&self) -> DriverResult<RotatorState>;

    /// Current angle in degrees, `None` if the reply was unreadable.
    async fn position(&self) -> DriverResult<Option<f64>>;
}

// =============================================================================
// TemperatureController
// =============================================================================

/// Cryostat temperature controller.
#[async_trait]
pub trait TemperatureController: Send + Sync {
    /// Device name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the device link is up.
    fn is_connected(&self) -> bool;

    /// Request a new setpoint in kelvin.
    async fn set_setpoint(&self, kelvin: f64) -> DriverResult<()>;

    /// Latest sample temperature in kelvin, `None` when no valid reading exists.
    async fn temperature(&self) -> DriverResult<Option<f64>>;
}

// =============================================================================
// Translator
// =============================================================================

/// Three-axis translation stage.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Device name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the device link is up.
    fn is_connected(&self) -> bool;

    /// Start a move to an absolute position.
    async fn move_abs(&self, target: Position3) -> DriverResult<()>;

    /// Start a move by an offset from the current position.
    async fn move_rel(&self, offset: Position3) -> DriverResult<()>;

    /// Current position.
    async fn position(&self) -> DriverResult<Position3>;

    /// Drift correction applied to moves flagged as reference-relative.
    ///
    /// Stages without drift tracking report zero.
    async fn reference_offset(&self) -> DriverResult<Position3> {
        Ok(Position3::ZERO)
    }
}

// =============================================================================
// Spectrometer
// =============================================================================

/// FTIR spectrometer. Scans and exports block until the instrument is done.
#[async_trait]
pub trait Spectrometer: Send + Sync {
    /// Device name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the device link is up.
    fn is_connected(&self) -> bool;

    /// Record a background or sample spectrum with the given experiment.
    async fn scan(&self, mode: ScanMode, slot: ExperimentSlot) -> DriverResult<()>;

    /// Compute and write out a dataset.
    async fn export(&self, request: &ExportRequest) -> DriverResult<()>;

    /// Switch the microscope light source.
    async fn set_illumination(&self, _illumination: Illumination) -> DriverResult<()> {
        Ok(())
    }
}

// =============================================================================
// SourceMeter
// =============================================================================

/// Source-measure unit that can be stepped in voltage or current.
#[async_trait]
pub trait SourceMeter: Send + Sync {
    /// Device name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the device link is up.
    fn is_connected(&self) -> bool;

    /// Whether the output relay is on.
    async fn output_enabled(&self) -> DriverResult<bool>;

    /// Protection limit for the given source mode (V or A).
    async fn limit(&self, mode: SourceMode) -> DriverResult<f64>;

    /// Present source level (V or A).
    async fn level(&self, mode: SourceMode) -> DriverResult<f64>;

    /// Set the source level (V or A).
    async fn set_level(&self, mode: SourceMode, value: f64) -> DriverResult<()>;
}
