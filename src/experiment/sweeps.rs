//! Batch generators for common measurement sequences.
//!
//! Each generator returns the commands to append; nothing is queued until
//! the caller appends them. Scans at stage positions are described by a
//! [`ScanPositions`] and a [`ScanPlan`].

use super::command::{
    Command, CommandAction, PositionTag, RampLeg, RotatorModel, RotatorRole, TranslateMode,
};
use crate::error::{WorklistError, WorklistResult};
use std::time::Duration;
use worklist_core::types::{ExperimentSlot, Position3, ScanMode, SourceMode};

/// Most points a single sweep may generate.
pub const MAX_SWEEP_POINTS: usize = 100_000;

/// Values from `start` towards `stop` in steps of `|step|`.
///
/// The direction follows `start` and `stop`. The sequence ends at the last
/// step before `stop`, or the one after it if that is less than half a step
/// beyond. A zero step, or one so small that the sweep would exceed
/// [`MAX_SWEEP_POINTS`], is rejected.
pub fn inclusive_steps(start: f64, stop: f64, step: f64) -> WorklistResult<Vec<f64>> {
    if !(start.is_finite() && stop.is_finite() && step.is_finite()) {
        return Err(WorklistError::InvalidCommand(
            "sweep bounds must be finite".to_string(),
        ));
    }
    if step == 0.0 {
        return Err(WorklistError::InvalidCommand(
            "sweep step cannot be 0".to_string(),
        ));
    }
    let step = step.abs();
    let direction = if stop < start { -1.0 } else { 1.0 };
    let span = (stop - start).abs();
    let count = ((span + step * (0.5 - 1e-9)) / step).floor();
    if count >= MAX_SWEEP_POINTS as f64 {
        return Err(WorklistError::InvalidCommand(format!(
            "sweep from {} to {} in steps of {} exceeds {} points",
            start, stop, step, MAX_SWEEP_POINTS
        )));
    }
    let count = count as usize;
    Ok((0..=count)
        .map(|k| {
            let value = start + direction * step * k as f64;
            (value * 1e9).round() / 1e9
        })
        .collect())
}

// =============================================================================
// Stage positions and scan plans
// =============================================================================

/// Stage positions used by generated scan sequences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPositions {
    /// Camera reference point
    pub reference: Option<Position3>,
    /// Background spot
    pub background: Option<Position3>,
    /// Sample spots; `sample1` is index 0
    pub samples: Vec<Position3>,
    /// Apply the stage's drift correction to every generated move
    pub use_reference_offset: bool,
}

impl ScanPositions {
    fn goto(&self, target: Position3, tag: PositionTag, pause: Duration) -> Command {
        Command::new(
            CommandAction::StageTranslate {
                mode: TranslateMode::Absolute,
                target,
                use_reference_offset: self.use_reference_offset,
                tag: Some(tag),
            },
            pause,
        )
    }

    fn background(&self, pause: Duration) -> WorklistResult<Command> {
        let target = self.background.ok_or_else(|| {
            WorklistError::InvalidCommand("no background position defined".to_string())
        })?;
        Ok(self.goto(target, PositionTag::Background, pause))
    }

    fn sample(&self, number: u32, pause: Duration) -> WorklistResult<Command> {
        let target = number
            .checked_sub(1)
            .and_then(|i| self.samples.get(i as usize))
            .ok_or_else(|| {
                WorklistError::InvalidCommand(format!("sample{} is not defined", number))
            })?;
        Ok(self.goto(*target, PositionTag::Sample(number), pause))
    }

    fn reference(&self, pause: Duration) -> WorklistResult<Command> {
        let target = self.reference.ok_or_else(|| {
            WorklistError::InvalidCommand("no reference position defined".to_string())
        })?;
        Ok(self.goto(target, PositionTag::Reference, pause))
    }
}

/// Scans taken at each step of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    /// Experiment slot the scans record into
    pub slot: ExperimentSlot,
    /// Background scans per step
    pub background_scans: u32,
    /// Sample scans per sample per step
    pub sample_scans: u32,
    /// First sample, numbered from 1
    pub first_sample: u32,
    /// Last sample, inclusive
    pub last_sample: u32,
    /// Pause after every stage move and scan
    pub pause: Duration,
}

impl ScanPlan {
    /// Stage moves and scans for one sweep step.
    fn commands(
        &self,
        positions: &ScanPositions,
        always_visit_background: bool,
    ) -> WorklistResult<Vec<Command>> {
        let mut out = Vec::new();
        if always_visit_background || self.background_scans > 0 {
            out.push(positions.background(self.pause)?);
            for _ in 0..self.background_scans {
                out.push(Command::scan(ScanMode::Background, self.slot, self.pause));
            }
        }
        if self.sample_scans > 0 {
            for number in self.first_sample.max(1)..=self.last_sample {
                out.push(positions.sample(number, self.pause)?);
                for _ in 0..self.sample_scans {
                    out.push(Command::scan(ScanMode::Sample, self.slot, self.pause));
                }
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Generators
// =============================================================================

/// Rotator moves from `start` to `stop`.
pub fn angle_sweep(
    role: RotatorRole,
    model: RotatorModel,
    start: f64,
    stop: f64,
    step: f64,
    pause: Duration,
) -> WorklistResult<Vec<Command>> {
    Ok(inclusive_steps(start, stop, step)?
        .into_iter()
        .map(|angle| Command::rotator(role, model, angle, pause))
        .collect())
}

/// Rotator sweep with a background and sample scan set at every angle.
pub fn combo_sweep(
    role: RotatorRole,
    model: RotatorModel,
    angles: (f64, f64, f64),
    pause: Duration,
    positions: &ScanPositions,
    plan: &ScanPlan,
) -> WorklistResult<Vec<Command>> {
    let (start, stop, step) = angles;
    let mut out = Vec::new();
    for angle in inclusive_steps(start, stop, step)? {
        out.push(Command::rotator(role, model, angle, pause));
        out.extend(plan.commands(positions, true)?);
    }
    Ok(out)
}

/// Temperature steps for [`temperature_sweep`].
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureSweep {
    /// First setpoint in K
    pub start: f64,
    /// Last setpoint in K
    pub stop: f64,
    /// Step in K
    pub step: f64,
    /// Allowed deviation in K
    pub tolerance: f64,
    /// Consecutive in-tolerance polls per setpoint
    pub stable_polls: u32,
    /// Switch to visible light while stabilising
    pub auto_xyz: bool,
    /// Visible illumination level, 0-100
    pub illumination: u8,
    /// Pause after each setpoint is reached
    pub pause: Duration,
}

/// Temperature setpoints with scans at each.
///
/// With `auto_xyz`, the stage returns to the camera reference point before
/// every setpoint.
pub fn temperature_sweep(
    sweep: &TemperatureSweep,
    positions: &ScanPositions,
    plan: &ScanPlan,
) -> WorklistResult<Vec<Command>> {
    let mut out = Vec::new();
    for kelvin in inclusive_steps(sweep.start, sweep.stop, sweep.step)? {
        if sweep.auto_xyz {
            out.push(positions.reference(plan.pause)?);
        }
        out.push(Command::new(
            CommandAction::TemperatureSetpoint {
                kelvin,
                tolerance: sweep.tolerance,
                stable_polls: sweep.stable_polls,
                auto_xyz: sweep.auto_xyz,
                illumination: sweep.illumination,
            },
            sweep.pause,
        ));
        out.extend(plan.commands(positions, false)?);
    }
    Ok(out)
}

/// One source meter's range in a [`level_sweep`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepChannel {
    /// Source meter 1 or 2
    pub device: u8,
    /// First level in V or A
    pub start: f64,
    /// Last level in V or A
    pub stop: f64,
    /// Level step in mV or mA, also the ramp step
    pub step: f64,
    /// Ramp rate in mV/s or mA/s
    pub rate: f64,
}

/// Voltage or current levels with scans at each.
///
/// With two channels both are stepped together; the sweep ends when the
/// shorter range does.
pub fn level_sweep(
    mode: SourceMode,
    channels: &[SweepChannel],
    points: u32,
    pause: Duration,
    positions: &ScanPositions,
    plan: &ScanPlan,
) -> WorklistResult<Vec<Command>> {
    if channels.is_empty() || channels.len() > 2 {
        return Err(WorklistError::InvalidCommand(
            "a level sweep drives one or two source meters".to_string(),
        ));
    }
    let ranges = channels
        .iter()
        .map(|ch| inclusive_steps(ch.start, ch.stop, ch.step / 1e3))
        .collect::<WorklistResult<Vec<_>>>()?;
    let steps = ranges.iter().map(Vec::len).min().unwrap_or(0);

    let mut out = Vec::new();
    for i in 0..steps {
        let legs = channels
            .iter()
            .zip(&ranges)
            .map(|(ch, levels)| RampLeg {
                device: ch.device,
                target: levels[i],
                rate: ch.rate,
                step: ch.step,
            })
            .collect();
        let ramp = Command::ramp(mode, legs, points, pause);
        ramp.validate()?;
        out.push(ramp);
        out.extend(plan.commands(positions, false)?);
    }
    Ok(out)
}
