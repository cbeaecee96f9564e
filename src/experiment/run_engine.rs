//! Queue runner.
//!
//! [`QueueRunner`] owns the worklist and executes it one command at a time
//! on a spawned tokio task. For each command it calls the start action,
//! waits the acknowledge delay, polls the kind's completion predicate, then
//! sleeps the command's pause before moving on.
//!
//! # Architecture
//!
//! ```text
//! CommandQueue ──snapshot──> run task ──start/poll──> Instruments (capability traits)
//!                               │
//!                               └──RunEvent──> broadcast subscribers (CLI, tests)
//! ```
//!
//! While a run is active the worklist cannot be edited. When the run ends,
//! whether completed, stopped or failed, the worklist is restored to the
//! snapshot taken at start. After a failure the cursor stays on the failed
//! command, which keeps its `Failed` state until the next run. A run task
//! that panics or is aborted is treated as a failure at the cursor.
//!
//! # Example
//!
//! ```rust,ignore
//! let runner = QueueRunner::new(instruments, RunnerSettings::default());
//! runner.load_text(&std::fs::read_to_string("scan.txt")?)?;
//!
//! let mut events = runner.subscribe();
//! let handle = runner.run()?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//!     if matches!(event, RunEvent::Finished { .. }) {
//!         break;
//!     }
//! }
//! let report = handle.await?;
//! ```

use super::command::{Command, CommandAction, CommandState, TranslateMode};
use super::completion::{self, StabilityCounter};
use super::journal::Journal;
use super::queue::CommandQueue;
use super::ramp;
use super::state::{RunOutcome, RunnerState};
use crate::error::{WorklistError, WorklistResult};
use crate::instruments::{InstrumentRole, Instruments};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use worklist_core::capabilities::SourceMeter;
use worklist_core::error::{DriverError, DriverErrorKind};
use worklist_core::types::{Illumination, Position3};

const EVENT_CAPACITY: usize = 1024;

// =============================================================================
// Settings, events, report
// =============================================================================

/// Runner timing.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    /// Wait between a start action and the first completion poll
    pub acknowledge_delay: Duration,
    /// Rotator state poll interval
    pub rotator_poll: Duration,
    /// Temperature poll interval
    pub temperature_poll: Duration,
    /// Gap between the two stage samples compared for settling
    pub stage_sample_gap: Duration,
    /// Fail a command whose completion takes longer (None waits forever)
    pub completion_timeout: Option<Duration>,
    /// Where experiment journals are written (None disables them)
    pub journal_dir: Option<PathBuf>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            acknowledge_delay: Duration::from_millis(100),
            rotator_poll: Duration::from_millis(50),
            temperature_poll: Duration::from_secs(1),
            stage_sample_gap: Duration::from_millis(10),
            completion_timeout: None,
            journal_dir: None,
        }
    }
}

/// Progress notifications broadcast during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// The run began with `total` commands
    RunStarted {
        /// Number of commands
        total: usize,
    },
    /// A command's start action is being issued
    CommandStarted {
        /// Position in the worklist
        index: usize,
        /// One-line description
        label: String,
    },
    /// A command finished, pause included
    CommandCompleted {
        /// Position in the worklist
        index: usize,
    },
    /// Share of commands finished
    Progress {
        /// 0 to 100
        percent: u8,
    },
    /// A command failed and the run is ending
    CommandFailed {
        /// Position in the worklist
        index: usize,
        /// One-line description
        label: String,
        /// Error text
        message: String,
    },
    /// The run is over and the worklist can be edited again
    Finished {
        /// How it ended
        outcome: RunOutcome,
    },
}

/// Summary returned by the run task.
#[derive(Debug)]
pub struct RunReport {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Commands that finished
    pub completed: usize,
    /// Commands in the worklist
    pub total: usize,
    /// The failure that ended the run
    pub error: Option<WorklistError>,
    /// Journal written for this run
    pub journal: Option<PathBuf>,
}

// =============================================================================
// QueueRunner
// =============================================================================

struct Shared {
    instruments: Instruments,
    settings: RunnerSettings,
    queue: Mutex<CommandQueue>,
    state: RwLock<RunnerState>,
    stop_requested: AtomicBool,
    events: broadcast::Sender<RunEvent>,
}

/// Executes a worklist against an instrument set.
///
/// Cloning gives another handle to the same runner.
#[derive(Clone)]
pub struct QueueRunner {
    shared: Arc<Shared>,
}

impl QueueRunner {
    /// Runner with an empty worklist.
    pub fn new(instruments: Instruments, settings: RunnerSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                instruments,
                settings,
                queue: Mutex::new(CommandQueue::new()),
                state: RwLock::new(RunnerState::Idle),
                stop_requested: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Receiver for run events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.shared.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunnerState {
        *self.shared.state.read()
    }

    /// Index of the executing command, or of the command a failed run
    /// stopped on. That command is also left in the `Failed` state.
    pub fn cursor(&self) -> Option<usize> {
        self.shared.queue.lock().cursor()
    }

    /// Copy of the worklist with execution state.
    pub fn queue_snapshot(&self) -> Vec<Command> {
        self.shared.queue.lock().commands().to_vec()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Whether the worklist is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.queue.lock().is_empty()
    }

    /// Worklist file text.
    pub fn to_text(&self) -> String {
        self.shared.queue.lock().to_text()
    }

    /// Instruments the runner drives.
    pub fn instruments(&self) -> &Instruments {
        &self.shared.instruments
    }

    fn edit<T>(&self, f: impl FnOnce(&mut CommandQueue) -> WorklistResult<T>) -> WorklistResult<T> {
        // Holding the state lock keeps run() from starting mid-edit.
        let state = self.shared.state.read();
        if state.is_active() {
            return Err(WorklistError::RunInProgress);
        }
        let mut queue = self.shared.queue.lock();
        f(&mut queue)
    }

    /// Add a command to the end of the worklist.
    pub fn append(&self, command: Command) -> WorklistResult<()> {
        self.edit(|queue| queue.append(command))
    }

    /// Drop the last command. No-op on an empty worklist.
    pub fn remove_last(&self) -> WorklistResult<Option<Command>> {
        self.edit(|queue| Ok(queue.remove_last()))
    }

    /// Drop every command.
    pub fn clear(&self) -> WorklistResult<()> {
        self.edit(|queue| {
            queue.clear();
            Ok(())
        })
    }

    /// Replace the worklist.
    pub fn replace(&self, commands: Vec<Command>) -> WorklistResult<()> {
        self.edit(|queue| queue.replace(commands))
    }

    /// Replace the worklist with the contents of a worklist file.
    pub fn load_text(&self, text: &str) -> WorklistResult<()> {
        let loaded = CommandQueue::from_text(text)?;
        self.edit(|queue| {
            *queue = loaded;
            Ok(())
        })
    }

    /// Start executing the worklist.
    ///
    /// Returns once the run task is spawned. Fails with `EmptyQueue`,
    /// `RunInProgress`, or `MissingInstrument` when a command targets a
    /// role with no instrument.
    pub fn run(&self) -> WorklistResult<JoinHandle<RunReport>> {
        let snapshot = {
            let mut state = self.shared.state.write();
            if !state.can_begin() {
                return Err(WorklistError::RunInProgress);
            }
            let mut queue = self.shared.queue.lock();
            if queue.is_empty() {
                return Err(WorklistError::EmptyQueue);
            }
            for command in queue.commands() {
                for role in required_roles(command) {
                    if !self.shared.instruments.has(role) {
                        return Err(WorklistError::MissingInstrument(role.to_string()));
                    }
                }
            }
            queue.reset_cursor();
            self.shared.stop_requested.store(false, Ordering::SeqCst);
            *state = RunnerState::Running;
            queue.snapshot()
        };

        let shared = Arc::clone(&self.shared);
        Ok(tokio::spawn(async move { shared.execute(snapshot).await }))
    }

    /// Ask the run to end after the command in progress.
    pub fn stop(&self) -> WorklistResult<()> {
        let mut state = self.shared.state.write();
        match *state {
            RunnerState::Idle => Err(WorklistError::NotRunning),
            RunnerState::Running | RunnerState::Stopping => {
                self.shared.stop_requested.store(true, Ordering::SeqCst);
                *state = RunnerState::Stopping;
                info!("Stop requested; finishing current command");
                Ok(())
            }
        }
    }
}

impl Shared {
    fn emit(&self, event: RunEvent) {
        let _ = self.events.send(event);
    }

    fn mark(&self, index: usize, state: CommandState) {
        if let Some(command) = self.queue.lock().get_mut(index) {
            command.state = state;
        }
    }

    /// Put back the worklist after a run and unlock editing.
    fn restore(&self, snapshot: Vec<Command>, failed_at: Option<usize>) {
        {
            let mut queue = self.queue.lock();
            queue.restore(snapshot, failed_at);
            if let Some(command) = failed_at.and_then(|index| queue.get_mut(index)) {
                command.state = CommandState::Failed;
            }
        }
        *self.state.write() = RunnerState::Idle;
    }

    async fn execute(&self, snapshot: Vec<Command>) -> RunReport {
        let guard = RunGuard {
            shared: self,
            snapshot: Some(snapshot.clone()),
        };
        let total = snapshot.len();
        info!(total, "Worklist run started");
        self.emit(RunEvent::RunStarted { total });

        let journal = self.settings.journal_dir.as_ref().and_then(|dir| {
            Journal::create(dir, &snapshot)
                .map_err(|e| warn!(error = %e, "Could not write experiment journal"))
                .ok()
        });

        let mut completed = 0;
        let mut failure = None;
        let outcome = loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break RunOutcome::Stopped;
            }
            let Some(index) = self.queue.lock().advance() else {
                break RunOutcome::Completed;
            };
            let command = snapshot[index].clone();
            let label = command.label();

            self.mark(index, CommandState::Started);
            info!(index, command = %label, "Command started");
            self.emit(RunEvent::CommandStarted {
                index,
                label: label.clone(),
            });

            match self.run_command(index, &command).await {
                Ok(()) => {
                    completed += 1;
                    self.emit(RunEvent::CommandCompleted { index });
                    let percent = (completed * 100 / total).min(100) as u8;
                    self.emit(RunEvent::Progress { percent });
                }
                Err(source) => {
                    self.mark(index, CommandState::Failed);
                    error!(index, command = %label, error = %source, "Command failed");
                    self.emit(RunEvent::CommandFailed {
                        index,
                        label: label.clone(),
                        message: source.to_string(),
                    });
                    failure = Some((
                        index,
                        WorklistError::CommandFailed {
                            index,
                            label,
                            source,
                        },
                    ));
                    break RunOutcome::Failed;
                }
            }
        };

        guard.finish(failure.as_ref().map(|(index, _)| *index));

        let journal = journal.and_then(|journal| {
            journal
                .finish(outcome)
                .map_err(|e| warn!(error = %e, "Could not finish experiment journal"))
                .ok()
        });

        info!(%outcome, completed, total, "Worklist run finished");
        self.emit(RunEvent::Finished { outcome });

        RunReport {
            outcome,
            completed,
            total,
            error: failure.map(|(_, err)| err),
            journal,
        }
    }

    /// Start, acknowledge, completion and pause for one command.
    async fn run_command(&self, index: usize, command: &Command) -> Result<(), DriverError> {
        self.start(command).await.map_err(into_driver_error)?;
        sleep(self.settings.acknowledge_delay).await;

        self.mark(index, CommandState::AwaitingCompletion);
        let completion = self.wait_complete(command);
        match self.settings.completion_timeout {
            Some(limit) => tokio::time::timeout(limit, completion)
                .await
                .map_err(|_| {
                    DriverError::new(
                        target_name(command),
                        DriverErrorKind::Timeout,
                        format!("not complete after {:?}", limit),
                    )
                })?
                .map_err(into_driver_error)?,
            None => completion.await.map_err(into_driver_error)?,
        }

        self.mark(index, CommandState::Done);
        sleep(command.pause).await;
        self.after_pause(command).await.map_err(into_driver_error)
    }

    #[instrument(skip_all, fields(kind = ?command.kind()))]
    async fn start(&self, command: &Command) -> WorklistResult<()> {
        let instruments = &self.instruments;
        match &command.action {
            CommandAction::RotatorMove { role, degrees, .. } => {
                let rotator = instruments.rotator(*role)?;
                if !rotator.is_connected() {
                    return Err(DriverError::not_connected(rotator.name()).into());
                }
                rotator.move_abs(*degrees).await?;
            }
            CommandAction::TemperatureSetpoint {
                kelvin,
                auto_xyz,
                illumination,
                ..
            } => {
                let controller = instruments.temperature()?;
                if !controller.is_connected() {
                    return Err(DriverError::not_connected(controller.name()).into());
                }
                if *auto_xyz {
                    instruments
                        .spectrometer()?
                        .set_illumination(Illumination::Visible(*illumination))
                        .await?;
                }
                controller.set_setpoint(*kelvin).await?;
            }
            CommandAction::StageTranslate {
                mode,
                target,
                use_reference_offset,
                ..
            } => {
                let stage = instruments.translator()?;
                if !stage.is_connected() {
                    return Err(DriverError::not_connected(stage.name()).into());
                }
                let offset = if *use_reference_offset {
                    stage.reference_offset().await?
                } else {
                    Position3::ZERO
                };
                match mode {
                    TranslateMode::Absolute => stage.move_abs(*target + offset).await?,
                    TranslateMode::Relative => stage.move_rel(*target + offset).await?,
                }
            }
            CommandAction::SpectrometerScan { mode, slot } => {
                let spectrometer = instruments.spectrometer()?;
                if !spectrometer.is_connected() {
                    return Err(DriverError::not_connected(spectrometer.name()).into());
                }
                spectrometer.scan(*mode, *slot).await?;
            }
            CommandAction::SpectrometerExport(request) => {
                let spectrometer = instruments.spectrometer()?;
                if !spectrometer.is_connected() {
                    return Err(DriverError::not_connected(spectrometer.name()).into());
                }
                spectrometer.export(request).await?;
            }
            CommandAction::SourceMeterRamp { mode, legs, points } => {
                let mut meters: Vec<(Arc<dyn SourceMeter>, _)> = Vec::with_capacity(legs.len());
                for leg in legs {
                    meters.push((Arc::clone(instruments.source_meter(leg.device)?), *leg));
                }
                ramp::execute_ramp(&meters, *mode, *points).await?;
            }
        }
        Ok(())
    }

    async fn wait_complete(&self, command: &Command) -> WorklistResult<()> {
        let settings = &self.settings;
        match &command.action {
            CommandAction::RotatorMove { role, .. } => {
                let rotator = self.instruments.rotator(*role)?;
                completion::rotator_ready(rotator.as_ref(), settings.rotator_poll).await?;
            }
            CommandAction::TemperatureSetpoint {
                kelvin,
                tolerance,
                stable_polls,
                ..
            } => {
                let controller = self.instruments.temperature()?;
                let counter = StabilityCounter::new(*kelvin, *tolerance, *stable_polls);
                completion::temperature_stable(
                    controller.as_ref(),
                    counter,
                    settings.temperature_poll,
                )
                .await?;
            }
            CommandAction::StageTranslate { .. } => {
                let stage = self.instruments.translator()?;
                completion::stage_settled(stage.as_ref(), settings.stage_sample_gap).await?;
            }
            CommandAction::SpectrometerScan { .. }
            | CommandAction::SpectrometerExport(_)
            | CommandAction::SourceMeterRamp { .. } => {}
        }
        Ok(())
    }

    /// Switch the microscope back to infrared after a temperature step.
    async fn after_pause(&self, command: &Command) -> WorklistResult<()> {
        if let CommandAction::TemperatureSetpoint { auto_xyz: true, .. } = command.action {
            self.instruments
                .spectrometer()?
                .set_illumination(Illumination::Infrared)
                .await?;
        }
        Ok(())
    }
}

/// Restores the worklist if the run task is dropped before it finishes.
///
/// Tokio drops a task's future when it panics or is aborted, so the runner
/// returns to `Idle` with the cursor on the command that was executing.
struct RunGuard<'a> {
    shared: &'a Shared,
    snapshot: Option<Vec<Command>>,
}

impl RunGuard<'_> {
    fn finish(mut self, failed_at: Option<usize>) {
        if let Some(snapshot) = self.snapshot.take() {
            self.shared.restore(snapshot, failed_at);
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let Some(snapshot) = self.snapshot.take() else {
            return;
        };
        let cursor = self.shared.queue.lock().cursor();
        self.shared.restore(snapshot, cursor);
        error!(?cursor, "Worklist run ended abnormally");
        self.shared.emit(RunEvent::Finished {
            outcome: RunOutcome::Failed,
        });
    }
}

/// Roles a command needs instruments for.
pub fn required_roles(command: &Command) -> Vec<InstrumentRole> {
    match &command.action {
        CommandAction::RotatorMove { role, .. } => vec![InstrumentRole::rotator(*role)],
        CommandAction::TemperatureSetpoint { auto_xyz, .. } => {
            let mut roles = vec![InstrumentRole::Temperature];
            if *auto_xyz {
                roles.push(InstrumentRole::Spectrometer);
            }
            roles
        }
        CommandAction::StageTranslate { .. } => vec![InstrumentRole::Translator],
        CommandAction::SpectrometerScan { .. } | CommandAction::SpectrometerExport(_) => {
            vec![InstrumentRole::Spectrometer]
        }
        CommandAction::SourceMeterRamp { legs, .. } => legs
            .iter()
            .filter_map(|leg| InstrumentRole::source_meter(leg.device))
            .collect(),
    }
}

fn target_name(command: &Command) -> String {
    required_roles(command)
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "worklist".to_string())
}

fn into_driver_error(err: WorklistError) -> DriverError {
    match err {
        WorklistError::Driver(err) => err,
        WorklistError::MissingInstrument(role) => {
            DriverError::new(role, DriverErrorKind::Configuration, "instrument is not configured")
        }
        other => DriverError::new("worklist", DriverErrorKind::Configuration, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::command::{RotatorModel, RotatorRole};
    use worklist_core::types::{ExperimentSlot, ScanMode};
    use worklist_core::capabilities::Rotator;
    use worklist_core::error::DriverResult;
    use worklist_core::types::RotatorState;
    use worklist_driver_mock::{MockRotator, MockSpectrometer, SpectrometerCall};

    /// Rotator whose driver crashes on the first move.
    struct CrashingRotator;

    #[async_trait::async_trait]
    impl Rotator for CrashingRotator {
        fn name(&self) -> &str {
            "crashing"
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn move_abs(&self, _degrees: f64) -> DriverResult<()> {
            panic!("driver crashed mid-move");
        }

        async fn controller_state(&self) -> DriverResult<RotatorState> {
            Ok(RotatorState::Ready)
        }

        async fn position(&self) -> DriverResult<Option<f64>> {
            Ok(None)
        }
    }

    fn rotate(degrees: f64) -> Command {
        Command::rotator(
            RotatorRole::Polarizer,
            RotatorModel::Thorlabs,
            degrees,
            Duration::ZERO,
        )
    }

    fn runner_with(rotator: Arc<MockRotator>) -> QueueRunner {
        QueueRunner::new(
            Instruments::new().with_rotator(RotatorRole::Polarizer, rotator),
            RunnerSettings::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_empty_queue_rejected() {
        let runner = runner_with(Arc::new(MockRotator::new()));
        assert!(matches!(runner.run(), Err(WorklistError::EmptyQueue)));
        assert!(matches!(runner.stop(), Err(WorklistError::NotRunning)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_instrument_rejected_before_start() {
        let runner = runner_with(Arc::new(MockRotator::new()));
        runner
            .append(Command::scan(
                ScanMode::Sample,
                ExperimentSlot::First,
                Duration::ZERO,
            ))
            .unwrap();
        assert!(matches!(
            runner.run(),
            Err(WorklistError::MissingInstrument(_))
        ));
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotator_moves_run_in_order() {
        let rotator = Arc::new(MockRotator::new());
        let runner = runner_with(rotator.clone());
        for angle in [10.0, 20.0, 30.0] {
            runner.append(rotate(angle)).unwrap();
        }

        let report = runner.run().unwrap().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.completed, 3);
        assert_eq!(rotator.moves(), vec![10.0, 20.0, 30.0]);
        assert_eq!(runner.state(), RunnerState::Idle);
        assert_eq!(runner.cursor(), None);
        assert!(runner
            .queue_snapshot()
            .iter()
            .all(|c| c.state == CommandState::Pending));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_driver_leaves_runner_idle() {
        let runner = QueueRunner::new(
            Instruments::new().with_rotator(RotatorRole::Polarizer, Arc::new(CrashingRotator)),
            RunnerSettings::default(),
        );
        runner.append(rotate(10.0)).unwrap();
        runner.append(rotate(20.0)).unwrap();
        let mut events = runner.subscribe();

        let joined = runner.run().unwrap().await;
        assert!(joined.unwrap_err().is_panic());

        assert_eq!(runner.state(), RunnerState::Idle);
        assert_eq!(runner.cursor(), Some(0));
        let states: Vec<_> = runner.queue_snapshot().iter().map(|c| c.state).collect();
        assert_eq!(states, vec![CommandState::Failed, CommandState::Pending]);
        assert!(matches!(runner.stop(), Err(WorklistError::NotRunning)));

        let mut finished = None;
        while let Ok(event) = events.try_recv() {
            if let RunEvent::Finished { outcome } = event {
                finished = Some(outcome);
            }
        }
        assert_eq!(finished, Some(RunOutcome::Failed));

        runner.append(rotate(30.0)).unwrap();
        assert_eq!(runner.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_run_lifecycle_is_logged() {
        let runner = runner_with(Arc::new(MockRotator::new()));
        runner.append(rotate(5.0)).unwrap();
        runner.run().unwrap().await.unwrap();

        assert!(logs_contain("Worklist run started"));
        assert!(logs_contain("Polarizer: Thorlabs, 5.0deg, 0s"));
        assert!(logs_contain("Worklist run finished"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_command() {
        let rotator = Arc::new(MockRotator::new());
        rotator.hold_state(Some(worklist_core::types::RotatorState::Moving));
        let runner = QueueRunner::new(
            Instruments::new().with_rotator(RotatorRole::Polarizer, rotator),
            RunnerSettings {
                completion_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        );
        runner.append(rotate(45.0)).unwrap();

        let report = runner.run().unwrap().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Failed);
        match report.error {
            Some(WorklistError::CommandFailed { index, source, .. }) => {
                assert_eq!(index, 0);
                assert_eq!(source.kind, DriverErrorKind::Timeout);
            }
            other => panic!("expected timeout failure, got {:?}", other),
        }
        assert_eq!(runner.cursor(), Some(0));
        assert_eq!(runner.queue_snapshot()[0].state, CommandState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_xyz_switches_illumination() {
        use worklist_driver_mock::MockTemperatureController;

        let spectrometer = Arc::new(MockSpectrometer::new());
        let controller = Arc::new(MockTemperatureController::new());
        controller.script([Some(10.0), Some(10.0)]);
        let runner = QueueRunner::new(
            Instruments::new()
                .with_temperature(controller)
                .with_spectrometer(spectrometer.clone()),
            RunnerSettings::default(),
        );
        runner
            .append(Command::new(
                CommandAction::TemperatureSetpoint {
                    kelvin: 10.0,
                    tolerance: 0.5,
                    stable_polls: 2,
                    auto_xyz: true,
                    illumination: 40,
                },
                Duration::from_secs(3),
            ))
            .unwrap();

        let report = runner.run().unwrap().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(
            spectrometer.calls(),
            vec![
                SpectrometerCall::Illumination(Illumination::Visible(40)),
                SpectrometerCall::Illumination(Illumination::Infrared),
            ]
        );
    }
}
