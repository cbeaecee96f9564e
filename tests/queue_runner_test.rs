//! Integration tests for the queue runner against simulated instruments.
//!
//! All tests run on a paused tokio clock, so pauses and poll intervals
//! elapse instantly while keeping their order.

use lab_worklist::experiment::{
    Command, CommandState, QueueRunner, RotatorModel, RotatorRole, RunEvent, RunOutcome,
    RunnerSettings, RunnerState,
};
use lab_worklist::{Instruments, WorklistError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use worklist_core::error::DriverErrorKind;
use worklist_driver_mock::{MockRotator, MockRotatorConfig, MockTemperatureController};

fn polarizer(degrees: f64, pause_secs: u64) -> Command {
    Command::rotator(
        RotatorRole::Polarizer,
        RotatorModel::Thorlabs,
        degrees,
        Duration::from_secs(pause_secs),
    )
}

fn analyzer(degrees: f64) -> Command {
    Command::rotator(
        RotatorRole::Analyzer,
        RotatorModel::Newport,
        degrees,
        Duration::ZERO,
    )
}

fn slow_rotator(degrees_per_sec: f64) -> Arc<MockRotator> {
    Arc::new(MockRotator::with_config(MockRotatorConfig {
        degrees_per_sec,
        ..Default::default()
    }))
}

async fn drain(events: &mut broadcast::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.recv().await {
        let finished = matches!(event, RunEvent::Finished { .. });
        seen.push(event);
        if finished {
            break;
        }
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn test_two_moves_run_in_order_with_pause() {
    let rotator = Arc::new(MockRotator::new());
    let runner = QueueRunner::new(
        Instruments::new().with_rotator(RotatorRole::Polarizer, rotator.clone()),
        RunnerSettings::default(),
    );
    runner.append(polarizer(45.0, 0)).unwrap();
    runner.append(polarizer(90.0, 1)).unwrap();

    let mut events = runner.subscribe();
    let started = Instant::now();
    let report = runner.run().unwrap().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.completed, 2);
    assert_eq!(rotator.moves(), vec![45.0, 90.0]);
    // two half-second moves, two acknowledgement delays, one 1 s pause
    assert!(elapsed >= Duration::from_secs(2), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "elapsed {:?}", elapsed);

    let seen = drain(&mut events).await;
    assert_eq!(
        seen,
        vec![
            RunEvent::RunStarted { total: 2 },
            RunEvent::CommandStarted {
                index: 0,
                label: "Polarizer: Thorlabs, 45.0deg, 0s".to_string()
            },
            RunEvent::CommandCompleted { index: 0 },
            RunEvent::Progress { percent: 50 },
            RunEvent::CommandStarted {
                index: 1,
                label: "Polarizer: Thorlabs, 90.0deg, 1s".to_string()
            },
            RunEvent::CommandCompleted { index: 1 },
            RunEvent::Progress { percent: 100 },
            RunEvent::Finished {
                outcome: RunOutcome::Completed
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_command_starts_before_previous_completes() {
    let polarizer_mount = slow_rotator(30.0);
    let analyzer_mount = slow_rotator(10.0);
    let runner = QueueRunner::new(
        Instruments::new()
            .with_rotator(RotatorRole::Polarizer, polarizer_mount.clone())
            .with_rotator(RotatorRole::Analyzer, analyzer_mount.clone()),
        RunnerSettings::default(),
    );
    for i in 0..6 {
        let angle = f64::from(i) * 15.0;
        let command = if i % 2 == 0 {
            polarizer(angle, 0)
        } else {
            analyzer(angle)
        };
        runner.append(command).unwrap();
    }

    let mut events = runner.subscribe();
    let report = runner.run().unwrap().await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);

    let mut in_flight: Option<usize> = None;
    let mut next = 0;
    for event in drain(&mut events).await {
        match event {
            RunEvent::CommandStarted { index, .. } => {
                assert_eq!(in_flight, None, "command {} started early", index);
                assert_eq!(index, next);
                in_flight = Some(index);
            }
            RunEvent::CommandCompleted { index } => {
                assert_eq!(in_flight, Some(index));
                in_flight = None;
                next += 1;
            }
            _ => {}
        }
    }
    assert_eq!(next, 6);
    assert_eq!(polarizer_mount.moves(), vec![0.0, 30.0, 60.0]);
    assert_eq!(analyzer_mount.moves(), vec![15.0, 45.0, 75.0]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_lets_current_command_finish() {
    let rotator = slow_rotator(10.0);
    let runner = QueueRunner::new(
        Instruments::new().with_rotator(RotatorRole::Polarizer, rotator.clone()),
        RunnerSettings::default(),
    );
    runner.append(polarizer(90.0, 2)).unwrap();
    runner.append(polarizer(0.0, 0)).unwrap();
    runner.append(polarizer(45.0, 0)).unwrap();

    let mut events = runner.subscribe();
    let handle = runner.run().unwrap();
    loop {
        if let RunEvent::CommandStarted { index: 0, .. } = events.recv().await.unwrap() {
            break;
        }
    }
    runner.stop().unwrap();
    assert_eq!(runner.state(), RunnerState::Stopping);

    let started = Instant::now();
    let report = handle.await.unwrap();
    // the 9 s move and its 2 s pause still run to the end
    assert!(started.elapsed() >= Duration::from_secs(11));
    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(report.completed, 1);
    assert!(report.error.is_none());
    assert_eq!(rotator.moves(), vec![90.0]);
    assert_eq!(runner.state(), RunnerState::Idle);
    assert_eq!(runner.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_mutation_rejected_while_running() {
    let rotator = slow_rotator(10.0);
    let runner = QueueRunner::new(
        Instruments::new().with_rotator(RotatorRole::Polarizer, rotator),
        RunnerSettings::default(),
    );
    runner.append(polarizer(90.0, 0)).unwrap();

    let handle = runner.run().unwrap();
    assert_eq!(runner.state(), RunnerState::Running);
    assert!(matches!(
        runner.append(polarizer(10.0, 0)),
        Err(WorklistError::RunInProgress)
    ));
    assert!(matches!(
        runner.remove_last(),
        Err(WorklistError::RunInProgress)
    ));
    assert!(matches!(runner.clear(), Err(WorklistError::RunInProgress)));
    assert!(matches!(runner.run(), Err(WorklistError::RunInProgress)));
    assert_eq!(runner.len(), 1);

    handle.await.unwrap();
    runner.append(polarizer(10.0, 0)).unwrap();
    assert_eq!(runner.len(), 2);
    assert!(runner.remove_last().unwrap().is_some());
    runner.clear().unwrap();
    assert!(runner.is_empty());
    assert!(runner.remove_last().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_temperature_waits_for_fresh_stable_run_after_excursion() {
    let controller = Arc::new(MockTemperatureController::new());
    let mut readings = Vec::new();
    for i in 0..90 {
        readings.push(Some(if i % 2 == 0 { 269.0 } else { 271.0 }));
    }
    readings.push(Some(271.5));
    readings.extend(std::iter::repeat(Some(270.3)).take(91));
    controller.script(readings);

    let runner = QueueRunner::new(
        Instruments::new().with_temperature(controller.clone()),
        RunnerSettings::default(),
    );
    runner
        .append(Command::temperature(270.0, 1.0, 90, Duration::ZERO))
        .unwrap();

    let started = Instant::now();
    let report = runner.run().unwrap().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(controller.setpoints(), vec![270.0]);
    // 182 one-second polls: the first 90 in tolerance, the excursion, then
    // 91 more; the last poll is 181 s after the first
    assert!(elapsed >= Duration::from_secs(181), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(182), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_device_fails_run_then_rerun_starts_over() {
    let polarizer_mount = Arc::new(MockRotator::new());
    let analyzer_mount = Arc::new(MockRotator::new());
    analyzer_mount.set_connected(false);
    let runner = QueueRunner::new(
        Instruments::new()
            .with_rotator(RotatorRole::Polarizer, polarizer_mount.clone())
            .with_rotator(RotatorRole::Analyzer, analyzer_mount.clone()),
        RunnerSettings::default(),
    );
    runner.append(polarizer(10.0, 0)).unwrap();
    runner.append(analyzer(20.0)).unwrap();
    runner.append(polarizer(30.0, 0)).unwrap();
    let before = runner.to_text();

    let mut events = runner.subscribe();
    let report = runner.run().unwrap().await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.completed, 1);
    match &report.error {
        Some(WorklistError::CommandFailed { index, source, .. }) => {
            assert_eq!(*index, 1);
            assert_eq!(source.kind, DriverErrorKind::Connection);
        }
        other => panic!("expected a command failure, got {:?}", other),
    }
    let failures = drain(&mut events)
        .await
        .into_iter()
        .filter(|e| matches!(e, RunEvent::CommandFailed { .. }))
        .count();
    assert_eq!(failures, 1);
    assert_eq!(runner.cursor(), Some(1));
    assert_eq!(runner.to_text(), before);
    assert_eq!(polarizer_mount.moves(), vec![10.0]);
    let states: Vec<_> = runner.queue_snapshot().iter().map(|c| c.state).collect();
    assert_eq!(
        states,
        vec![
            CommandState::Pending,
            CommandState::Failed,
            CommandState::Pending
        ]
    );

    analyzer_mount.set_connected(true);
    let report = runner.run().unwrap().await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.completed, 3);
    assert_eq!(polarizer_mount.moves(), vec![10.0, 10.0, 30.0]);
    assert_eq!(analyzer_mount.moves(), vec![20.0]);
    assert_eq!(runner.cursor(), None);
}
