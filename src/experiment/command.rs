//! Worklist command model.
//!
//! A [`Command`] is one queued hardware action: a [`CommandAction`] naming
//! the target by role plus its parameters, the pause applied after
//! completion, and the execution state the runner advances.

use crate::error::{WorklistError, WorklistResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use worklist_core::types::{ExperimentSlot, ExportRequest, Position3, ScanMode, SourceMode};

// =============================================================================
// Targets and parameters
// =============================================================================

/// Which rotation mount a move is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotatorRole {
    /// Mount before the sample.
    Polarizer,
    /// Mount after the sample.
    Analyzer,
}

impl RotatorRole {
    /// Label used in worklist files.
    pub fn label(&self) -> &'static str {
        match self {
            RotatorRole::Polarizer => "Polarizer",
            RotatorRole::Analyzer => "Analyzer",
        }
    }
}

/// Vendor of the rotation mount, recorded with each move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotatorModel {
    /// Elliptec ELL14 mount
    Thorlabs,
    /// Newport controller
    Newport,
}

impl RotatorModel {
    /// Label used in worklist files.
    pub fn label(&self) -> &'static str {
        match self {
            RotatorModel::Thorlabs => "Thorlabs",
            RotatorModel::Newport => "Newport",
        }
    }

    /// Parse a label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Thorlabs" => Some(RotatorModel::Thorlabs),
            "Newport" => Some(RotatorModel::Newport),
            _ => None,
        }
    }
}

/// Whether a stage target is a position or an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslateMode {
    /// Move to the given coordinates.
    Absolute,
    /// Move by the given offset.
    Relative,
}

/// Named stage position a move was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionTag {
    /// Camera reference point.
    Reference,
    /// Background spot.
    Background,
    /// Sample spot, numbered from 1.
    Sample(u32),
}

impl fmt::Display for PositionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionTag::Reference => write!(f, "reference"),
            PositionTag::Background => write!(f, "background"),
            PositionTag::Sample(n) => write!(f, "sample{}", n),
        }
    }
}

impl PositionTag {
    /// Parse `reference`, `background` or `sampleN`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        match text {
            "reference" => Some(PositionTag::Reference),
            "background" => Some(PositionTag::Background),
            _ => text
                .strip_prefix("sample")
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .map(PositionTag::Sample),
        }
    }
}

/// One source meter's part of a ramp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampLeg {
    /// Source meter channel, 1 or 2.
    pub device: u8,
    /// Final level in V or A.
    pub target: f64,
    /// Ramp rate in mV/s or mA/s.
    pub rate: f64,
    /// Step size in mV or mA.
    pub step: f64,
}

impl RampLeg {
    /// Delay between ramp points: `|step| / rate / points` seconds.
    ///
    /// `None` when the delay does not fit in a [`Duration`].
    pub fn point_delay(&self, points: u32) -> Option<Duration> {
        if self.rate <= 0.0 || points == 0 {
            return Some(Duration::ZERO);
        }
        Duration::try_from_secs_f64(self.step.abs() / self.rate / f64::from(points)).ok()
    }
}

// =============================================================================
// Command
// =============================================================================

/// Kind-specific action and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandAction {
    /// Rotate a polarizer or analyzer to an absolute angle.
    RotatorMove {
        /// Target mount
        role: RotatorRole,
        /// Mount vendor
        model: RotatorModel,
        /// Angle in degrees
        degrees: f64,
    },
    /// Change the cryostat setpoint and wait for stability.
    TemperatureSetpoint {
        /// Setpoint in K
        kelvin: f64,
        /// Allowed deviation in K
        tolerance: f64,
        /// Consecutive in-tolerance polls required
        stable_polls: u32,
        /// Switch the microscope to visible light while waiting
        auto_xyz: bool,
        /// Visible illumination level, 0-100
        illumination: u8,
    },
    /// Move the XYZ stage.
    StageTranslate {
        /// Absolute or relative
        mode: TranslateMode,
        /// Coordinates or offset in µm
        target: Position3,
        /// Add the stage's drift correction
        use_reference_offset: bool,
        /// Named position this move came from
        tag: Option<PositionTag>,
    },
    /// Record a spectrum.
    SpectrometerScan {
        /// Background or sample
        mode: ScanMode,
        /// Experiment setup
        slot: ExperimentSlot,
    },
    /// Export a processed dataset.
    SpectrometerExport(ExportRequest),
    /// Step one or two source meters to new levels.
    SourceMeterRamp {
        /// Voltage or current
        mode: SourceMode,
        /// One leg per source meter
        legs: Vec<RampLeg>,
        /// Number of ramp points
        points: u32,
    },
}

/// Discriminant of [`CommandAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// [`CommandAction::RotatorMove`]
    RotatorMove,
    /// [`CommandAction::TemperatureSetpoint`]
    TemperatureSetpoint,
    /// [`CommandAction::StageTranslate`]
    StageTranslate,
    /// [`CommandAction::SpectrometerScan`]
    SpectrometerScan,
    /// [`CommandAction::SpectrometerExport`]
    SpectrometerExport,
    /// [`CommandAction::SourceMeterRamp`]
    SourceMeterRamp,
}

impl CommandAction {
    /// Discriminant.
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandAction::RotatorMove { .. } => CommandKind::RotatorMove,
            CommandAction::TemperatureSetpoint { .. } => CommandKind::TemperatureSetpoint,
            CommandAction::StageTranslate { .. } => CommandKind::StageTranslate,
            CommandAction::SpectrometerScan { .. } => CommandKind::SpectrometerScan,
            CommandAction::SpectrometerExport(_) => CommandKind::SpectrometerExport,
            CommandAction::SourceMeterRamp { .. } => CommandKind::SourceMeterRamp,
        }
    }
}

/// Execution state of a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommandState {
    /// Not yet started.
    #[default]
    Pending,
    /// Start action issued.
    Started,
    /// Polling the completion predicate.
    AwaitingCompletion,
    /// Finished, including its pause.
    Done,
    /// Start or completion detection failed.
    Failed,
}

impl CommandState {
    /// Whether the command is the one currently executing.
    pub fn is_active(&self) -> bool {
        matches!(self, CommandState::Started | CommandState::AwaitingCompletion)
    }
}

/// One queued hardware action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// What to do.
    pub action: CommandAction,
    /// Drain delay after completion.
    pub pause: Duration,
    /// Execution state, owned by the runner.
    #[serde(skip)]
    pub state: CommandState,
}

impl Command {
    /// Pending command.
    pub fn new(action: CommandAction, pause: Duration) -> Self {
        Self {
            action,
            pause,
            state: CommandState::Pending,
        }
    }

    /// Rotator move.
    pub fn rotator(role: RotatorRole, model: RotatorModel, degrees: f64, pause: Duration) -> Self {
        Self::new(
            CommandAction::RotatorMove {
                role,
                model,
                degrees,
            },
            pause,
        )
    }

    /// Temperature setpoint without illumination switching.
    pub fn temperature(kelvin: f64, tolerance: f64, stable_polls: u32, pause: Duration) -> Self {
        Self::new(
            CommandAction::TemperatureSetpoint {
                kelvin,
                tolerance,
                stable_polls,
                auto_xyz: false,
                illumination: 0,
            },
            pause,
        )
    }

    /// Untagged stage move.
    pub fn translate(mode: TranslateMode, target: Position3, pause: Duration) -> Self {
        Self::new(
            CommandAction::StageTranslate {
                mode,
                target,
                use_reference_offset: false,
                tag: None,
            },
            pause,
        )
    }

    /// Spectrometer scan.
    pub fn scan(mode: ScanMode, slot: ExperimentSlot, pause: Duration) -> Self {
        Self::new(CommandAction::SpectrometerScan { mode, slot }, pause)
    }

    /// Spectrometer export. Exports have no pause.
    pub fn export(request: ExportRequest) -> Self {
        Self::new(CommandAction::SpectrometerExport(request), Duration::ZERO)
    }

    /// Source meter ramp.
    pub fn ramp(mode: SourceMode, legs: Vec<RampLeg>, points: u32, pause: Duration) -> Self {
        Self::new(CommandAction::SourceMeterRamp { mode, legs, points }, pause)
    }

    /// Discriminant of the action.
    pub fn kind(&self) -> CommandKind {
        self.action.kind()
    }

    /// Human-readable one-line description, the worklist file form.
    pub fn label(&self) -> String {
        crate::experiment::format::format_command(self)
    }

    /// Copy with the execution state reset.
    pub fn pending_copy(&self) -> Self {
        Self {
            state: CommandState::Pending,
            ..self.clone()
        }
    }

    /// Reject parameters no instrument could act on.
    pub fn validate(&self) -> WorklistResult<()> {
        let invalid =
            |msg: String| -> WorklistResult<()> { Err(WorklistError::InvalidCommand(msg)) };

        match &self.action {
            CommandAction::RotatorMove { degrees, .. } => {
                if !degrees.is_finite() {
                    return invalid(format!("rotator angle {} is not finite", degrees));
                }
            }
            CommandAction::TemperatureSetpoint {
                kelvin,
                tolerance,
                stable_polls,
                illumination,
                ..
            } => {
                if !kelvin.is_finite() || *kelvin < 0.0 {
                    return invalid(format!("setpoint {} K is not a temperature", kelvin));
                }
                if !tolerance.is_finite() || *tolerance < 0.0 {
                    return invalid(format!("tolerance {} K must be non-negative", tolerance));
                }
                if *stable_polls == 0 {
                    return invalid("stability requires at least one poll".to_string());
                }
                if *illumination > 100 {
                    return invalid(format!("illumination {} exceeds 100", illumination));
                }
            }
            CommandAction::StageTranslate { target, .. } => {
                if !(target.x.is_finite() && target.y.is_finite() && target.z.is_finite()) {
                    return invalid(format!("stage target {} is not finite", target));
                }
            }
            CommandAction::SpectrometerScan { .. } => {}
            CommandAction::SpectrometerExport(request) => {
                if request.vmax <= request.vmin {
                    return invalid(format!(
                        "vmax {} must exceed vmin {}",
                        request.vmax, request.vmin
                    ));
                }
                if request.title.contains(',') || request.title.contains('\n') {
                    return invalid("export title cannot contain commas or newlines".to_string());
                }
            }
            CommandAction::SourceMeterRamp { legs, points, .. } => {
                if *points == 0 {
                    return invalid("ramp needs at least one point".to_string());
                }
                match legs.as_slice() {
                    [leg] if leg.device == 1 || leg.device == 2 => {}
                    [first, second] if first.device == 1 && second.device == 2 => {}
                    _ => {
                        return invalid(
                            "ramp must drive device 1 or 2, or both in order".to_string(),
                        )
                    }
                }
                for leg in legs {
                    if !(leg.rate.is_finite() && leg.rate > 0.0) {
                        return invalid(format!("ramp rate {} must be positive", leg.rate));
                    }
                    if !(leg.target.is_finite() && leg.step.is_finite()) {
                        return invalid("ramp target and step must be finite".to_string());
                    }
                    if leg.point_delay(*points).is_none() {
                        return invalid(format!(
                            "ramp step {} at {} per second is too slow to time",
                            leg.step, leg.rate
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Wrap an angle into (-180, 180].
pub fn wrap_angle(degrees: f64) -> f64 {
    if degrees > 180.0 {
        degrees - 360.0
    } else {
        degrees
    }
}
