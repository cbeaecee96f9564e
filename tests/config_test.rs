//! Configuration loading, environment overrides, and building instruments
//! from a configuration file.

use lab_worklist::config::{WorklistConfig, DEFAULT_CONFIG_PATH};
use lab_worklist::experiment::RotatorRole;
use lab_worklist::logging::OutputFormat;
use lab_worklist::{InstrumentRole, InstrumentsBuilder, QueueRunner, RunOutcome, WorklistError};
use serial_test::serial;
use std::path::Path;
use std::time::Duration;

fn write_config(dir: &Path, journal_dir: &Path) -> std::path::PathBuf {
    let path = dir.join("worklist.toml");
    let text = format!(
        r#"
[application]
log_level = "debug"
log_format = "json"

[runner]
acknowledge_delay_ms = 1
rotator_poll_ms = 5
journal_dir = "{}"

[[instruments]]
id = "pol"
role = "polarizer"
driver = "mock_rotator"
[instruments.config]
degrees_per_sec = 0.0

[[instruments]]
id = "ftir"
role = "spectrometer"
driver = "mock_spectrometer"

[[instruments]]
id = "spare"
role = "analyzer"
driver = "mock_rotator"
enabled = false
"#,
        journal_dir.display().to_string().replace('\\', "/")
    );
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
#[serial]
fn test_shipped_config_is_valid() {
    let config = WorklistConfig::load_from(DEFAULT_CONFIG_PATH).unwrap();
    config.validate().unwrap();
    InstrumentsBuilder::default().validate(&config).unwrap();
    assert!(config
        .enabled_instruments()
        .any(|def| def.role == InstrumentRole::Temperature));
}

#[test]
#[serial]
fn test_file_values_and_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &dir.path().join("journal"));
    let config = WorklistConfig::load_from(&path).unwrap();

    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.application.log_format, OutputFormat::Json);
    let settings = config.runner.settings();
    assert_eq!(settings.acknowledge_delay, Duration::from_millis(1));
    assert_eq!(settings.rotator_poll, Duration::from_millis(5));
    assert_eq!(settings.temperature_poll, Duration::from_secs(1));
    assert_eq!(settings.completion_timeout, None);
    assert_eq!(config.instruments.len(), 3);
    assert_eq!(config.enabled_instruments().count(), 2);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &dir.path().join("journal"));

    std::env::set_var("WORKLIST_RUNNER__ROTATOR_POLL_MS", "20");
    std::env::set_var("WORKLIST_RUNNER__COMPLETION_TIMEOUT_SECS", "600");
    std::env::set_var("WORKLIST_APPLICATION__LOG_LEVEL", "warn");
    let loaded = WorklistConfig::load_from(&path);
    std::env::remove_var("WORKLIST_RUNNER__ROTATOR_POLL_MS");
    std::env::remove_var("WORKLIST_RUNNER__COMPLETION_TIMEOUT_SECS");
    std::env::remove_var("WORKLIST_APPLICATION__LOG_LEVEL");

    let config = loaded.unwrap();
    assert_eq!(config.runner.rotator_poll_ms, 20);
    assert_eq!(config.runner.completion_timeout_secs, Some(600));
    assert_eq!(config.application.log_level, "warn");
    assert_eq!(config.runner.acknowledge_delay_ms, 1);
}

#[test]
#[serial]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = WorklistConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.application.name, "Lab Worklist");
    assert!(config.instruments.is_empty());
    config.validate().unwrap();
}

#[tokio::test]
#[serial]
async fn test_unknown_driver_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(
        &path,
        "[[instruments]]\nid = \"x\"\nrole = \"translator\"\ndriver = \"piezo_9000\"\n",
    )
    .unwrap();
    let config = WorklistConfig::load_from(&path).unwrap();
    let err = InstrumentsBuilder::default()
        .build(&config)
        .await
        .unwrap_err();
    assert!(matches!(err, WorklistError::Configuration(_)));
    assert!(err.to_string().contains("piezo_9000"));
}

#[tokio::test]
#[serial]
async fn test_configured_run_writes_journal() {
    let dir = tempfile::tempdir().unwrap();
    let journal_dir = dir.path().join("journal");
    let config = WorklistConfig::load_from(write_config(dir.path(), &journal_dir)).unwrap();

    let instruments = InstrumentsBuilder::default().build(&config).await.unwrap();
    assert!(instruments.rotator(RotatorRole::Polarizer).is_ok());
    assert!(matches!(
        instruments.rotator(RotatorRole::Analyzer),
        Err(WorklistError::MissingInstrument(_))
    ));

    let runner = QueueRunner::new(instruments, config.runner.settings());
    runner
        .load_text(
            "Commands:\n\
             1. Polarizer: Thorlabs, 30.0deg, 0s\n\
             2. Bruker: Scan sample, XPM1, 0s\n",
        )
        .unwrap();
    let report = runner.run().unwrap().await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);

    let journal = report.journal.unwrap();
    assert!(journal.starts_with(&journal_dir));
    assert!(journal
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("_experimentLog.txt"));
    let text = std::fs::read_to_string(&journal).unwrap();
    assert!(text.contains("1. Polarizer: Thorlabs, 30.0deg, 0s\n"));
    assert!(text.contains("XPM1:\n0\t\t30.0deg\n"));
    assert!(text.contains("(completed)"));
}
