//! Value types shared between device adapters and the worklist.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

// =============================================================================
// Translation stage
// =============================================================================

/// XYZ coordinate in micrometres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position3 {
    /// X in µm
    pub x: f64,
    /// Y in µm
    pub y: f64,
    /// Z in µm
    pub z: f64,
}

impl Position3 {
    /// Origin.
    pub const ZERO: Position3 = Position3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Build a position from its three coordinates.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Add for Position3 {
    type Output = Position3;

    fn add(self, rhs: Position3) -> Position3 {
        Position3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl fmt::Display for Position3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}) µm", self.x, self.y, self.z)
    }
}

// =============================================================================
// Rotators
// =============================================================================

/// Controller state of a rotation mount, normalised across vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotatorState {
    /// Idle and holding position.
    Ready,
    /// Executing a move.
    Moving,
    /// Searching for the home switch.
    Homing,
    /// Powered but never homed.
    NotReferenced,
    /// In configuration mode.
    Configuration,
    /// Motor disabled.
    Disabled,
    /// Fault reported by the controller.
    Fault,
    /// Reply could not be mapped to a state.
    Unknown,
}

impl RotatorState {
    /// Whether a move has finished.
    pub fn is_ready(&self) -> bool {
        matches!(self, RotatorState::Ready)
    }
}

impl fmt::Display for RotatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RotatorState::Ready => "ready",
            RotatorState::Moving => "moving",
            RotatorState::Homing => "homing",
            RotatorState::NotReferenced => "not referenced",
            RotatorState::Configuration => "configuration",
            RotatorState::Disabled => "disabled",
            RotatorState::Fault => "fault",
            RotatorState::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Spectrometer
// =============================================================================

/// Which reference a spectrometer scan records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Background (reference) spectrum.
    Background,
    /// Sample spectrum.
    Sample,
}

impl ScanMode {
    /// Lower-case label used in worklist files.
    pub fn label(&self) -> &'static str {
        match self {
            ScanMode::Background => "background",
            ScanMode::Sample => "sample",
        }
    }
}

/// One of the two experiment setups loaded into the spectrometer.
///
/// Scans refer to the slot by its experiment file (`XPM1`), exports by the
/// dataset it produced (`dataset1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperimentSlot {
    /// First experiment / dataset.
    First,
    /// Second experiment / dataset.
    Second,
}

impl ExperimentSlot {
    /// Experiment file label, `XPM1` or `XPM2`.
    pub fn xpm_label(&self) -> &'static str {
        match self {
            ExperimentSlot::First => "XPM1",
            ExperimentSlot::Second => "XPM2",
        }
    }

    /// Dataset label, `dataset1` or `dataset2`.
    pub fn dataset_label(&self) -> &'static str {
        match self {
            ExperimentSlot::First => "dataset1",
            ExperimentSlot::Second => "dataset2",
        }
    }

    /// Parse either label form.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "XPM1" | "dataset1" => Some(ExperimentSlot::First),
            "XPM2" | "dataset2" => Some(ExperimentSlot::Second),
            _ => None,
        }
    }
}

/// Quantity computed from the sample/background pair on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementType {
    /// Reflectance
    Reflectance,
    /// Transmittance
    Transmittance,
}

impl MeasurementType {
    /// Short label, `REFL` or `TR`.
    pub fn label(&self) -> &'static str {
        match self {
            MeasurementType::Reflectance => "REFL",
            MeasurementType::Transmittance => "TR",
        }
    }

    /// Parse a short label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "REFL" => Some(MeasurementType::Reflectance),
            "TR" => Some(MeasurementType::Transmittance),
            _ => None,
        }
    }
}

/// Everything the spectrometer needs to export one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Dataset to export.
    pub dataset: ExperimentSlot,
    /// Computed quantity.
    pub measurement: MeasurementType,
    /// Plot title and file stem.
    pub title: String,
    /// Colour scale minimum.
    pub vmin: f64,
    /// Colour scale maximum.
    pub vmax: f64,
    /// Also write the raw spectra.
    pub save_raw: bool,
    /// Keep the intermediate CSV.
    pub keep_csv: bool,
    /// Frequency of interest in cm⁻¹.
    pub frequency: f64,
    /// Fit the response against rotator angle.
    pub angle_fit: bool,
    /// Rotator angles measured into this dataset, in order.
    pub angles: Vec<f64>,
}

/// Light source selection on the spectrometer microscope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Illumination {
    /// Visible lamp at the given intensity (0–100).
    Visible(u8),
    /// Infrared source, visible lamp off.
    Infrared,
}

// =============================================================================
// Source meter
// =============================================================================

/// Sourcing function of a source-measure unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Source voltage.
    Voltage,
    /// Source current.
    Current,
}

impl SourceMode {
    /// Base unit, `V` or `A`.
    pub fn unit(&self) -> &'static str {
        match self {
            SourceMode::Voltage => "V",
            SourceMode::Current => "A",
        }
    }

    /// Milli unit used for steps and rates, `mV` or `mA`.
    pub fn milli_unit(&self) -> &'static str {
        match self {
            SourceMode::Voltage => "mV",
            SourceMode::Current => "mA",
        }
    }

    /// Lower-case name used in worklist files.
    pub fn label(&self) -> &'static str {
        match self {
            SourceMode::Voltage => "voltage",
            SourceMode::Current => "current",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_add() {
        let p = Position3::new(1.0, 2.0, 3.0) + Position3::new(0.5, -2.0, 1.0);
        assert_eq!(p, Position3::new(1.5, 0.0, 4.0));
    }

    #[test]
    fn test_slot_labels() {
        assert_eq!(ExperimentSlot::from_label("XPM2"), Some(ExperimentSlot::Second));
        assert_eq!(ExperimentSlot::from_label("dataset1"), Some(ExperimentSlot::First));
        assert_eq!(ExperimentSlot::from_label("XPM3"), None);
        assert_eq!(ExperimentSlot::Second.dataset_label(), "dataset2");
    }

    #[test]
    fn test_rotator_state_ready() {
        assert!(RotatorState::Ready.is_ready());
        assert!(!RotatorState::Moving.is_ready());
        assert_eq!(RotatorState::NotReferenced.to_string(), "not referenced");
    }
}
