//! Experiment journal.
//!
//! A run with a journal directory configured writes
//! `<dir>/<YYYYmmdd_HHMMSS>_experimentLog.txt` holding the start time, the
//! worklist, and for each dataset a table of its sample scans (scan index,
//! sample position, rotator angle). The finish time and outcome are
//! appended when the run ends. Runs started within the same second get a
//! `-2`, `-3`, ... suffix on the timestamp instead of sharing a file.

use super::command::{Command, CommandAction, PositionTag};
use super::format::{format_float, serialize};
use super::state::RunOutcome;
use crate::error::WorklistResult;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use worklist_core::types::{ExperimentSlot, ScanMode};

const TIMESTAMP: &str = "%Y/%m/%d %H:%M:%S";
const MAX_SAME_SECOND_RUNS: u32 = 1000;

/// One sample scan as recorded in the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    /// Scan number within its dataset, from 0
    pub index: usize,
    /// Last sample position moved to before the scan
    pub sample: Option<u32>,
    /// Last rotator angle set before the scan, in degrees
    pub angle: Option<f64>,
}

/// Sample scans per dataset, in worklist order.
pub fn scan_table(commands: &[Command]) -> [Vec<ScanEntry>; 2] {
    let mut tables: [Vec<ScanEntry>; 2] = [Vec::new(), Vec::new()];
    let mut sample = None;
    let mut angle = None;
    for command in commands {
        match &command.action {
            CommandAction::RotatorMove { degrees, .. } => angle = Some(*degrees),
            CommandAction::StageTranslate {
                tag: Some(PositionTag::Sample(n)),
                ..
            } => sample = Some(*n),
            CommandAction::SpectrometerScan {
                mode: ScanMode::Sample,
                slot,
            } => {
                let table = &mut tables[slot_index(*slot)];
                table.push(ScanEntry {
                    index: table.len(),
                    sample,
                    angle,
                });
            }
            _ => {}
        }
    }
    tables
}

fn slot_index(slot: ExperimentSlot) -> usize {
    match slot {
        ExperimentSlot::First => 0,
        ExperimentSlot::Second => 1,
    }
}

/// Journal file for one run.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// File name for a run started at `at`.
    pub fn file_name(at: DateTime<Local>) -> String {
        format!("{}_experimentLog.txt", at.format("%Y%m%d_%H%M%S"))
    }

    /// File name for the `n`th run started within the same second.
    fn numbered_file_name(at: DateTime<Local>, n: u32) -> String {
        if n <= 1 {
            Self::file_name(at)
        } else {
            format!("{}-{}_experimentLog.txt", at.format("%Y%m%d_%H%M%S"), n)
        }
    }

    /// Create the directory if needed and write the journal header.
    ///
    /// An existing journal is never overwritten.
    pub fn create(dir: &Path, commands: &[Command]) -> WorklistResult<Self> {
        let now = Local::now();
        fs::create_dir_all(dir)?;
        for n in 1..=MAX_SAME_SECOND_RUNS {
            let path = dir.join(Self::numbered_file_name(now, n));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(render_header(now, commands).as_bytes())?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free journal name in {}", dir.display()),
        )
        .into())
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the finish time and outcome.
    pub fn finish(self, outcome: RunOutcome) -> WorklistResult<PathBuf> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "Finished: {} ({})", Local::now().format(TIMESTAMP), outcome)?;
        Ok(self.path)
    }
}

fn render_header(at: DateTime<Local>, commands: &[Command]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "{}", at.format(TIMESTAMP));
    text.push_str(&serialize(commands));

    for (slot, table) in [ExperimentSlot::First, ExperimentSlot::Second]
        .into_iter()
        .zip(scan_table(commands))
    {
        if table.is_empty() {
            continue;
        }
        let _ = writeln!(text, "{}:", slot.xpm_label());
        for entry in table {
            let sample = entry
                .sample
                .map(|n| PositionTag::Sample(n).to_string())
                .unwrap_or_default();
            let angle = entry
                .angle
                .map(|a| format!("{}deg", format_float(a)))
                .unwrap_or_default();
            let _ = writeln!(text, "{}\t{}\t{}", entry.index, sample, angle);
        }
    }
    text
}
