//! Ordered worklist with an execution cursor.

use crate::error::WorklistResult;
use crate::experiment::command::{wrap_angle, Command, CommandAction};
use crate::experiment::format;
use worklist_core::types::{ExperimentSlot, ScanMode};

/// Commands in execution order plus the index of the one executing.
///
/// The cursor is `None` before the first command starts and only moves
/// forward during a run. The queue itself does not know whether a run is
/// active; [`QueueRunner`](crate::experiment::QueueRunner) gates mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandQueue {
    commands: Vec<Command>,
    cursor: Option<usize>,
}

impl CommandQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue holding `commands`, after validating each one.
    pub fn from_commands(commands: Vec<Command>) -> WorklistResult<Self> {
        let mut queue = Self::new();
        queue.replace(commands)?;
        Ok(queue)
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Queued commands in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Command at `index`.
    pub fn get(&self, index: usize) -> Option<&Command> {
        self.commands.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Command> {
        self.commands.get_mut(index)
    }

    /// Index of the executing command.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Move the cursor to the next command and return its index.
    ///
    /// Returns `None` once the cursor has passed the last command.
    pub(crate) fn advance(&mut self) -> Option<usize> {
        let next = self.cursor.map_or(0, |i| i + 1);
        self.cursor = Some(next);
        (next < self.commands.len()).then_some(next)
    }

    pub(crate) fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    /// Validate and add a command to the end.
    ///
    /// Exports get the rotator angles of the sample scans queued before them.
    pub fn append(&mut self, command: Command) -> WorklistResult<()> {
        command.validate()?;
        let mut command = command.pending_copy();
        if let CommandAction::SpectrometerExport(request) = &mut command.action {
            request.angles = scan_angles(&self.commands, request.dataset);
        }
        self.commands.push(command);
        Ok(())
    }

    /// Drop the last command. No-op on an empty queue.
    pub fn remove_last(&mut self) -> Option<Command> {
        self.commands.pop()
    }

    /// Drop every command and reset the cursor.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.cursor = None;
    }

    /// Swap in a whole new list, as when loading a file.
    ///
    /// Nothing changes unless every command validates.
    pub fn replace(&mut self, commands: Vec<Command>) -> WorklistResult<()> {
        let mut fresh = CommandQueue::new();
        for command in commands {
            fresh.append(command)?;
        }
        *self = fresh;
        Ok(())
    }

    /// Deep copy of the commands with their execution state reset.
    pub fn snapshot(&self) -> Vec<Command> {
        self.commands.iter().map(Command::pending_copy).collect()
    }

    /// Restore from a snapshot and place the cursor.
    pub(crate) fn restore(&mut self, snapshot: Vec<Command>, cursor: Option<usize>) {
        self.commands = snapshot;
        self.cursor = cursor;
    }

    /// Worklist file text.
    pub fn to_text(&self) -> String {
        format::serialize(&self.commands)
    }

    /// Parse worklist file text.
    pub fn from_text(text: &str) -> WorklistResult<Self> {
        Self::from_commands(format::deserialize(text)?)
    }
}

/// Angles of the sample scans into `slot`, in order.
///
/// Each scan takes the angle of the last rotator move before it, wrapped
/// into (-180, 180]. Scans with no earlier rotator move are skipped.
pub fn scan_angles(commands: &[Command], slot: ExperimentSlot) -> Vec<f64> {
    let mut angle = None;
    let mut angles = Vec::new();
    for command in commands {
        match &command.action {
            CommandAction::RotatorMove { degrees, .. } => angle = Some(wrap_angle(*degrees)),
            CommandAction::SpectrometerScan {
                mode: ScanMode::Sample,
                slot: scanned,
            } if *scanned == slot => {
                if let Some(angle) = angle {
                    angles.push(angle);
                }
            }
            _ => {}
        }
    }
    angles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::command::{RotatorModel, RotatorRole};
    use std::time::Duration;
    use worklist_core::types::{ExportRequest, MeasurementType};

    fn rotate(degrees: f64) -> Command {
        Command::rotator(
            RotatorRole::Analyzer,
            RotatorModel::Thorlabs,
            degrees,
            Duration::ZERO,
        )
    }

    fn sample(slot: ExperimentSlot) -> Command {
        Command::scan(ScanMode::Sample, slot, Duration::ZERO)
    }

    fn export(slot: ExperimentSlot) -> Command {
        Command::export(ExportRequest {
            dataset: slot,
            measurement: MeasurementType::Transmittance,
            title: "sweep".to_string(),
            vmin: 0.0,
            vmax: 2.0,
            save_raw: true,
            keep_csv: false,
            frequency: 1000.0,
            angle_fit: true,
            angles: vec![99.0],
        })
    }

    #[test]
    fn test_export_collects_angles_of_matching_scans() {
        let mut queue = CommandQueue::new();
        queue.append(sample(ExperimentSlot::First)).unwrap();
        queue.append(rotate(10.0)).unwrap();
        queue.append(sample(ExperimentSlot::First)).unwrap();
        queue.append(rotate(270.0)).unwrap();
        queue
            .append(Command::scan(
                ScanMode::Background,
                ExperimentSlot::First,
                Duration::ZERO,
            ))
            .unwrap();
        queue.append(sample(ExperimentSlot::First)).unwrap();
        queue.append(sample(ExperimentSlot::Second)).unwrap();
        queue.append(export(ExperimentSlot::First)).unwrap();

        match &queue.commands().last().unwrap().action {
            CommandAction::SpectrometerExport(request) => {
                assert_eq!(request.angles, vec![10.0, -90.0]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_append_rejects_invalid_command() {
        let mut queue = CommandQueue::new();
        assert!(queue
            .append(Command::temperature(10.0, 0.5, 0, Duration::ZERO))
            .is_err());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_last_on_empty_is_noop() {
        let mut queue = CommandQueue::new();
        assert!(queue.remove_last().is_none());
        queue.append(rotate(5.0)).unwrap();
        queue.append(rotate(6.0)).unwrap();
        queue.remove_last();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cursor_advances_past_end() {
        let mut queue = CommandQueue::from_commands(vec![rotate(1.0), rotate(2.0)]).unwrap();
        assert_eq!(queue.cursor(), None);
        assert_eq!(queue.advance(), Some(0));
        assert_eq!(queue.advance(), Some(1));
        assert_eq!(queue.advance(), None);
        assert_eq!(queue.cursor(), Some(2));
        queue.reset_cursor();
        assert_eq!(queue.cursor(), None);
    }

    #[test]
    fn test_replace_is_all_or_nothing() {
        let mut queue = CommandQueue::from_commands(vec![rotate(1.0)]).unwrap();
        let result = queue.replace(vec![
            rotate(2.0),
            Command::temperature(10.0, -1.0, 5, Duration::ZERO),
        ]);
        assert!(result.is_err());
        assert_eq!(queue.snapshot(), vec![rotate(1.0)]);
    }

    #[test]
    fn test_text_round_trip_recomputes_angles() {
        let queue = CommandQueue::from_commands(vec![
            rotate(30.0),
            sample(ExperimentSlot::Second),
            export(ExperimentSlot::Second),
        ])
        .unwrap();
        let text = queue.to_text();
        let loaded = CommandQueue::from_text(&text).unwrap();
        assert_eq!(loaded, queue);
        assert_eq!(loaded.to_text(), text);
    }
}
