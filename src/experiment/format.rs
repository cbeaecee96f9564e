//! Worklist text format.
//!
//! ```text
//! Commands:
//! 1. Polarizer: Thorlabs, 45.0deg, 0s
//! 2. Set Temperature: 270.0K, 1.0K, 90s, 0s, False, 5
//! 3. Translator (Abs): 100.0, 200.0, 30.0, ReferencePointFalse, 0s, sample1
//! 4. Bruker: Scan sample, XPM2, 5s
//! 5. Keithley: device1, voltage ramp, 1.5V, 100.0 mV/sec, 10.0mV, 5points, 0s
//! ```
//!
//! Numbers are written in shortest round-trip form with whole values keeping
//! a trailing `.0`; whole-second pauses are written as integers. Parsing
//! also accepts files written by older versions of the tool: `µm` suffixes
//! on stage coordinates, translator lines without the reference flag, and
//! temperature lines without the illumination fields.

use crate::error::{WorklistError, WorklistResult};
use crate::experiment::command::{
    Command, CommandAction, PositionTag, RampLeg, RotatorModel, RotatorRole, TranslateMode,
};
use std::time::Duration;
use worklist_core::types::{
    ExperimentSlot, ExportRequest, MeasurementType, Position3, ScanMode, SourceMode,
};

/// First line of every worklist file.
pub const HEADER: &str = "Commands:";

const EXPORT_ACTION: &str = "Save result as txt and png";

// =============================================================================
// Writing
// =============================================================================

/// Float in shortest round-trip form, whole values with `.0`.
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn format_pause(pause: Duration) -> String {
    if pause.subsec_nanos() == 0 {
        format!("{}s", pause.as_secs())
    } else {
        format!("{}s", format_float(pause.as_secs_f64()))
    }
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// One command in file form, without the leading number.
pub fn format_command(command: &Command) -> String {
    let pause = format_pause(command.pause);
    match &command.action {
        CommandAction::RotatorMove {
            role,
            model,
            degrees,
        } => format!(
            "{}: {}, {}deg, {}",
            role.label(),
            model.label(),
            format_float(*degrees),
            pause
        ),
        CommandAction::TemperatureSetpoint {
            kelvin,
            tolerance,
            stable_polls,
            auto_xyz,
            illumination,
        } => format!(
            "Set Temperature: {}K, {}K, {}s, {}, {}, {}",
            format_float(*kelvin),
            format_float(*tolerance),
            stable_polls,
            pause,
            format_bool(*auto_xyz),
            illumination
        ),
        CommandAction::StageTranslate {
            mode,
            target,
            use_reference_offset,
            tag,
        } => {
            let mode = match mode {
                TranslateMode::Absolute => "Abs",
                TranslateMode::Relative => "Rel",
            };
            let mut line = format!(
                "Translator ({}): {}, {}, {}, ReferencePoint{}, {}",
                mode,
                format_float(target.x),
                format_float(target.y),
                format_float(target.z),
                format_bool(*use_reference_offset),
                pause
            );
            if let Some(tag) = tag {
                line.push_str(&format!(", {}", tag));
            }
            line
        }
        CommandAction::SpectrometerScan { mode, slot } => format!(
            "Bruker: Scan {}, {}, {}",
            mode.label(),
            slot.xpm_label(),
            pause
        ),
        CommandAction::SpectrometerExport(request) => format!(
            "Bruker: {}, {}, {}, {}, vmin={}, vmax={}, raw spectra {}, csv {}, freq={}, angle fit {}",
            EXPORT_ACTION,
            request.dataset.dataset_label(),
            request.measurement.label(),
            request.title,
            format_float(request.vmin),
            format_float(request.vmax),
            format_bool(request.save_raw),
            format_bool(request.keep_csv),
            format_float(request.frequency),
            format_bool(request.angle_fit)
        ),
        CommandAction::SourceMeterRamp { mode, legs, points } => {
            let leg_text = |leg: &RampLeg| {
                format!(
                    "{}{}, {} {}/sec, {}{}",
                    format_float(leg.target),
                    mode.unit(),
                    format_float(leg.rate),
                    mode.milli_unit(),
                    format_float(leg.step),
                    mode.milli_unit()
                )
            };
            let device = match legs.as_slice() {
                [leg] => format!("device{}", leg.device),
                _ => "two device".to_string(),
            };
            let legs_text: Vec<String> = legs.iter().map(leg_text).collect();
            format!(
                "Keithley: {}, {} ramp, {}, {}points, {}",
                device,
                mode.label(),
                legs_text.join(", "),
                points,
                pause
            )
        }
    }
}

/// Render a whole worklist.
pub fn serialize(commands: &[Command]) -> String {
    let mut text = String::from(HEADER);
    text.push('\n');
    for (i, command) in commands.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, format_command(command)));
    }
    text
}

// =============================================================================
// Reading
// =============================================================================

/// Cursor over the comma-separated fields of one line.
struct Fields<'a> {
    line: usize,
    values: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    fn new(line: usize, text: &'a str) -> Self {
        Self {
            line,
            values: text.split(", ").map(str::trim).collect(),
        }
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn error(&self, message: impl Into<String>) -> WorklistError {
        WorklistError::format(self.line, message)
    }

    fn expect_len(&self, allowed: &[usize]) -> WorklistResult<()> {
        if allowed.contains(&self.len()) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {} fields, found {}",
                allowed
                    .iter()
                    .map(usize::to_string)
                    .collect::<Vec<_>>()
                    .join(" or "),
                self.len()
            )))
        }
    }

    fn text(&self, index: usize) -> WorklistResult<&'a str> {
        self.values
            .get(index)
            .copied()
            .ok_or_else(|| self.error(format!("missing field {}", index + 1)))
    }

    /// Number with one of the given unit suffixes (or none if empty).
    fn number(&self, index: usize, suffixes: &[&str]) -> WorklistResult<f64> {
        let raw = self.text(index)?;
        let mut value = raw;
        for suffix in suffixes {
            if let Some(stripped) = raw.strip_suffix(suffix) {
                value = stripped;
                break;
            }
        }
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| self.error(format!("'{}' is not a number", raw)))
    }

    fn integer(&self, index: usize, suffix: &str) -> WorklistResult<u32> {
        let raw = self.text(index)?;
        raw.strip_suffix(suffix)
            .unwrap_or(raw)
            .trim()
            .parse::<u32>()
            .map_err(|_| self.error(format!("'{}' is not a whole number", raw)))
    }

    fn pause(&self, index: usize) -> WorklistResult<Duration> {
        let seconds = self.number(index, &["s"])?;
        Duration::try_from_secs_f64(seconds)
            .map_err(|_| self.error(format!("pause {} s is not a duration", seconds)))
    }

    fn flag(&self, index: usize, prefix: &str) -> WorklistResult<bool> {
        let raw = self.text(index)?;
        match raw.strip_prefix(prefix).unwrap_or(raw) {
            "True" => Ok(true),
            "False" => Ok(false),
            _ => Err(self.error(format!("'{}' is not True or False", raw))),
        }
    }

    fn keyed_number(&self, index: usize, key: &str) -> WorklistResult<f64> {
        let raw = self.text(index)?;
        let value = raw
            .strip_prefix(key)
            .ok_or_else(|| self.error(format!("expected '{}' in '{}'", key, raw)))?;
        value
            .parse::<f64>()
            .map_err(|_| self.error(format!("'{}' is not a number", raw)))
    }
}

const MICRONS: &[&str] = &["µm", "μm", "um"];

/// Parse one `N. Kind: fields` line.
fn parse_line(line_no: usize, line: &str) -> WorklistResult<Command> {
    let err = |message: String| WorklistError::format(line_no, message);

    let (number, rest) = line
        .split_once(". ")
        .ok_or_else(|| err("expected 'N. <command>'".to_string()))?;
    if number.trim().parse::<usize>().is_err() {
        return Err(err(format!("'{}' is not a command number", number)));
    }

    let (kind, body) = rest
        .split_once(": ")
        .ok_or_else(|| err("expected '<kind>: <fields>'".to_string()))?;
    let fields = Fields::new(line_no, body);

    let command = match kind.trim() {
        "Polarizer" | "Analyzer" => {
            let role = if kind.trim() == "Polarizer" {
                RotatorRole::Polarizer
            } else {
                RotatorRole::Analyzer
            };
            fields.expect_len(&[3])?;
            let model = RotatorModel::from_label(fields.text(0)?)
                .ok_or_else(|| err(format!("unknown rotator '{}'", body)))?;
            Command::rotator(role, model, fields.number(1, &["deg"])?, fields.pause(2)?)
        }
        "Set Temperature" => {
            fields.expect_len(&[4, 6])?;
            let (auto_xyz, illumination) = if fields.len() == 6 {
                let level = fields.integer(5, "")?;
                let level = u8::try_from(level)
                    .map_err(|_| err(format!("illumination {} out of range", level)))?;
                (fields.flag(4, "")?, level)
            } else {
                (false, 0)
            };
            Command::new(
                CommandAction::TemperatureSetpoint {
                    kelvin: fields.number(0, &["K"])?,
                    tolerance: fields.number(1, &["K"])?,
                    stable_polls: fields.integer(2, "s")?,
                    auto_xyz,
                    illumination,
                },
                fields.pause(3)?,
            )
        }
        "Translator (Abs)" | "Translator (Rel)" => {
            let mode = if kind.trim() == "Translator (Abs)" {
                TranslateMode::Absolute
            } else {
                TranslateMode::Relative
            };
            fields.expect_len(&[4, 5, 6])?;
            let target = Position3::new(
                fields.number(0, MICRONS)?,
                fields.number(1, MICRONS)?,
                fields.number(2, MICRONS)?,
            );
            let (use_reference_offset, pause, tag) = if fields.len() == 4 {
                (false, fields.pause(3)?, None)
            } else {
                let tag = if fields.len() == 6 {
                    let raw = fields.text(5)?;
                    Some(
                        PositionTag::parse(raw)
                            .ok_or_else(|| err(format!("unknown position tag '{}'", raw)))?,
                    )
                } else {
                    None
                };
                (fields.flag(3, "ReferencePoint")?, fields.pause(4)?, tag)
            };
            Command::new(
                CommandAction::StageTranslate {
                    mode,
                    target,
                    use_reference_offset,
                    tag,
                },
                pause,
            )
        }
        "Bruker" => parse_bruker(&fields)?,
        "Keithley" => parse_keithley(&fields)?,
        other => return Err(err(format!("unknown command kind '{}'", other))),
    };

    command
        .validate()
        .map_err(|e| err(e.to_string()))?;
    Ok(command)
}

fn parse_bruker(fields: &Fields<'_>) -> WorklistResult<Command> {
    let action = fields.text(0)?;
    if let Some(mode) = action.strip_prefix("Scan ") {
        fields.expect_len(&[3])?;
        let mode = match mode {
            "background" => ScanMode::Background,
            "sample" => ScanMode::Sample,
            other => return Err(fields.error(format!("unknown scan mode '{}'", other))),
        };
        let slot = parse_slot(fields, 1)?;
        return Ok(Command::scan(mode, slot, fields.pause(2)?));
    }

    if action != EXPORT_ACTION {
        return Err(fields.error(format!("unknown Bruker action '{}'", action)));
    }
    fields.expect_len(&[10])?;
    let measurement = MeasurementType::from_label(fields.text(2)?)
        .ok_or_else(|| fields.error(format!("unknown measurement '{}'", fields.values[2])))?;
    Ok(Command::export(ExportRequest {
        dataset: parse_slot(fields, 1)?,
        measurement,
        title: fields.text(3)?.to_string(),
        vmin: fields.keyed_number(4, "vmin=")?,
        vmax: fields.keyed_number(5, "vmax=")?,
        save_raw: fields.flag(6, "raw spectra ")?,
        keep_csv: fields.flag(7, "csv ")?,
        frequency: fields.keyed_number(8, "freq=")?,
        angle_fit: fields.flag(9, "angle fit ")?,
        angles: Vec::new(),
    }))
}

fn parse_slot(fields: &Fields<'_>, index: usize) -> WorklistResult<ExperimentSlot> {
    let raw = fields.text(index)?;
    ExperimentSlot::from_label(raw)
        .ok_or_else(|| fields.error(format!("unknown experiment slot '{}'", raw)))
}

fn parse_keithley(fields: &Fields<'_>) -> WorklistResult<Command> {
    let device = fields.text(0)?;
    let mode = match fields.text(1)? {
        "voltage ramp" => SourceMode::Voltage,
        "current ramp" => SourceMode::Current,
        other => return Err(fields.error(format!("unknown ramp '{}'", other))),
    };
    let unit = [mode.unit()];
    let rate_unit = format!(" {}/sec", mode.milli_unit());
    let rate_unit = [rate_unit.as_str()];
    let milli = [mode.milli_unit()];

    let leg = |device: u8, first: usize| -> WorklistResult<RampLeg> {
        Ok(RampLeg {
            device,
            target: fields.number(first, &unit)?,
            rate: fields.number(first + 1, &rate_unit)?,
            step: fields.number(first + 2, &milli)?,
        })
    };

    let (legs, tail) = if device == "two device" {
        fields.expect_len(&[10])?;
        (vec![leg(1, 2)?, leg(2, 5)?], 8)
    } else {
        fields.expect_len(&[7])?;
        let index = device
            .strip_prefix("device")
            .and_then(|n| n.parse::<u8>().ok())
            .ok_or_else(|| fields.error(format!("unknown source meter '{}'", device)))?;
        (vec![leg(index, 2)?], 5)
    };

    Ok(Command::ramp(
        mode,
        legs,
        fields.integer(tail, "points")?,
        fields.pause(tail + 1)?,
    ))
}

/// Parse a worklist file.
///
/// The header and blank lines are skipped. Line numbers in errors are
/// 1-based positions in `text`.
pub fn deserialize(text: &str) -> WorklistResult<Vec<Command>> {
    let mut commands = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line == HEADER {
            continue;
        }
        commands.push(parse_line(i + 1, line)?);
    }
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Commands:
1. Polarizer: Thorlabs, 45.0deg, 0s
2. Set Temperature: 270.0K, 1.0K, 90s, 0s, False, 5
3. Translator (Abs): 100.0, 200.0, 30.0, ReferencePointFalse, 0s, sample1
4. Translator (Rel): 5.0, 0.0, 0.0, ReferencePointFalse, 2s
5. Bruker: Scan background, XPM1, 0s
6. Bruker: Scan sample, XPM2, 5s
7. Bruker: Save result as txt and png, dataset1, REFL, run, vmin=0.0, vmax=1.0, raw spectra False, csv True, freq=500.0, angle fit False
8. Keithley: device1, voltage ramp, 1.5V, 100.0 mV/sec, 10.0mV, 5points, 0s
9. Keithley: two device, current ramp, 0.1A, 10.0 mA/sec, 1.0mA, 0.02A, 10.0 mA/sec, 1.0mA, 5points, 0s
";

    #[test]
    fn test_sample_file_is_a_fixed_point() {
        let commands = deserialize(SAMPLE).unwrap();
        assert_eq!(commands.len(), 9);
        assert_eq!(serialize(&commands), SAMPLE);
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(45.0), "45.0");
        assert_eq!(format_float(-0.5), "-0.5");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(398.25), "398.25");
    }

    #[test]
    fn test_fractional_pause() {
        let command = Command::rotator(
            RotatorRole::Analyzer,
            RotatorModel::Newport,
            90.0,
            Duration::from_millis(1500),
        );
        assert_eq!(format_command(&command), "Analyzer: Newport, 90.0deg, 1.5s");
        let back = deserialize(&serialize(&[command.clone()])).unwrap();
        assert_eq!(back, vec![command]);
    }

    #[test]
    fn test_legacy_lines() {
        let text = "\
Commands:
1. Translator (Abs): 1.5µm, 2.0μm, -3.0um, 1s
2. Set Temperature: 10.0K, 0.1K, 30s, 0s
";
        let commands = deserialize(text).unwrap();
        assert_eq!(
            commands[0].action,
            CommandAction::StageTranslate {
                mode: TranslateMode::Absolute,
                target: Position3::new(1.5, 2.0, -3.0),
                use_reference_offset: false,
                tag: None,
            }
        );
        assert_eq!(commands[0].pause, Duration::from_secs(1));
        assert!(matches!(
            commands[1].action,
            CommandAction::TemperatureSetpoint {
                stable_polls: 30,
                auto_xyz: false,
                ..
            }
        ));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let text = "Commands:\n\n1. Bruker: Scan sample, XPM1, 0s\n\n";
        assert_eq!(deserialize(text).unwrap().len(), 1);
    }

    #[test]
    fn test_errors_name_the_line() {
        let text = "Commands:\n1. Polarizer: Thorlabs, 45.0deg, 0s\n2. Laser: 800nm\n";
        match deserialize(text) {
            Err(WorklistError::Format { line, message }) => {
                assert_eq!(line, 3);
                assert!(message.contains("Laser"));
            }
            other => panic!("expected format error, got {:?}", other),
        }

        let bad_number = "1. Polarizer: Thorlabs, fortydeg, 0s";
        assert!(matches!(
            deserialize(bad_number),
            Err(WorklistError::Format { line: 1, .. })
        ));

        let endless = "Commands:\n1. Polarizer: Thorlabs, 45.0deg, 1e30s";
        match deserialize(endless) {
            Err(WorklistError::Format { line, message }) => {
                assert_eq!(line, 2);
                assert!(message.contains("not a duration"), "{}", message);
            }
            other => panic!("expected format error, got {:?}", other),
        }
        assert!(matches!(
            deserialize("1. Polarizer: Thorlabs, 45.0deg, -1s"),
            Err(WorklistError::Format { line: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_parameters_are_format_errors() {
        let text = "1. Keithley: device1, voltage ramp, 1.0V, 0.0 mV/sec, 1.0mV, 5points, 0s";
        assert!(matches!(
            deserialize(text),
            Err(WorklistError::Format { line: 1, .. })
        ));
    }
}
