//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/worklist.toml` by default)
//! 2. environment variables prefixed with `WORKLIST_`, with `__` separating
//!    nested keys
//!
//! Every section has defaults, so an empty file yields a runnable (if
//! instrument-less) configuration.
//!
//! # Example
//! ```no_run
//! use lab_worklist::config::WorklistConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // WORKLIST_RUNNER__TEMPERATURE_POLL_MS=500 overrides the file
//! let config = WorklistConfig::load_from("config/worklist.toml")?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use crate::error::{WorklistError, WorklistResult};
use crate::experiment::RunnerSettings;
use crate::instruments::InstrumentRole;
use crate::logging::{parse_log_level, OutputFormat};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/worklist.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "WORKLIST_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorklistConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Queue runner timing and journal
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Instrument definitions
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Queue runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Delay between a command's start action and its first completion poll
    #[serde(default = "default_acknowledge_delay")]
    pub acknowledge_delay_ms: u64,
    /// Rotator state poll interval
    #[serde(default = "default_rotator_poll")]
    pub rotator_poll_ms: u64,
    /// Temperature poll interval
    #[serde(default = "default_temperature_poll")]
    pub temperature_poll_ms: u64,
    /// Gap between the two stage position samples compared for settling
    #[serde(default = "default_stage_sample_gap")]
    pub stage_sample_gap_ms: u64,
    /// Fail a command whose completion takes longer than this (unset waits forever)
    #[serde(default)]
    pub completion_timeout_secs: Option<u64>,
    /// Directory for experiment journals (unset disables the journal)
    #[serde(default)]
    pub journal_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            acknowledge_delay_ms: default_acknowledge_delay(),
            rotator_poll_ms: default_rotator_poll(),
            temperature_poll_ms: default_temperature_poll(),
            stage_sample_gap_ms: default_stage_sample_gap(),
            completion_timeout_secs: None,
            journal_dir: None,
        }
    }
}

impl RunnerConfig {
    /// Runner timing as durations.
    pub fn settings(&self) -> RunnerSettings {
        RunnerSettings {
            acknowledge_delay: Duration::from_millis(self.acknowledge_delay_ms),
            rotator_poll: Duration::from_millis(self.rotator_poll_ms),
            temperature_poll: Duration::from_millis(self.temperature_poll_ms),
            stage_sample_gap: Duration::from_millis(self.stage_sample_gap_ms),
            completion_timeout: self.completion_timeout_secs.map(Duration::from_secs),
            journal_dir: self.journal_dir.clone(),
        }
    }
}

/// Instrument definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Unique instrument identifier
    pub id: String,
    /// Role the instrument plays in worklists
    pub role: InstrumentRole,
    /// Driver type (e.g. "ell14", "mock_temperature")
    pub driver: String,
    /// Whether this instrument is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Driver-specific configuration
    #[serde(default = "default_driver_config")]
    pub config: toml::Value,
}

fn default_name() -> String {
    "Lab Worklist".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_acknowledge_delay() -> u64 {
    100
}

fn default_rotator_poll() -> u64 {
    50
}

fn default_temperature_poll() -> u64 {
    1000
}

fn default_stage_sample_gap() -> u64 {
    10
}

fn default_enabled() -> bool {
    true
}

fn default_driver_config() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl WorklistConfig {
    /// Load from `config/worklist.toml` and the environment.
    pub fn load() -> WorklistResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> WorklistResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// Provider chain: the file, then the environment.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> WorklistResult<()> {
        parse_log_level(&self.application.log_level).map_err(WorklistError::Configuration)?;

        let runner = &self.runner;
        for (name, value) in [
            ("rotator_poll_ms", runner.rotator_poll_ms),
            ("temperature_poll_ms", runner.temperature_poll_ms),
            ("stage_sample_gap_ms", runner.stage_sample_gap_ms),
        ] {
            if value == 0 {
                return Err(WorklistError::Configuration(format!(
                    "runner.{} must be greater than zero",
                    name
                )));
            }
        }
        if runner.completion_timeout_secs == Some(0) {
            return Err(WorklistError::Configuration(
                "runner.completion_timeout_secs must be greater than zero when set".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        let mut roles = HashSet::new();
        for instrument in &self.instruments {
            if !ids.insert(&instrument.id) {
                return Err(WorklistError::Configuration(format!(
                    "Duplicate instrument ID: {}",
                    instrument.id
                )));
            }
            if instrument.enabled && !roles.insert(instrument.role) {
                return Err(WorklistError::Configuration(format!(
                    "More than one enabled instrument for role {}",
                    instrument.role
                )));
            }
        }
        Ok(())
    }

    /// Instruments that are switched on.
    pub fn enabled_instruments(&self) -> impl Iterator<Item = &InstrumentDefinition> {
        self.instruments.iter().filter(|inst| inst.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock(id: &str, role: InstrumentRole, driver: &str) -> InstrumentDefinition {
        InstrumentDefinition {
            id: id.to_string(),
            role,
            driver: driver.to_string(),
            enabled: true,
            config: default_driver_config(),
        }
    }

    #[test]
    fn test_defaults_validate() {
        let config = WorklistConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runner.temperature_poll_ms, 1000);
        assert_eq!(config.runner.settings().completion_timeout, None);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = WorklistConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(WorklistError::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_instrument_ids() {
        let config = WorklistConfig {
            instruments: vec![
                mock("a", InstrumentRole::Polarizer, "mock_rotator"),
                mock("a", InstrumentRole::Analyzer, "mock_rotator"),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_enabled_roles() {
        let mut config = WorklistConfig {
            instruments: vec![
                mock("a", InstrumentRole::Polarizer, "mock_rotator"),
                mock("b", InstrumentRole::Polarizer, "ell14"),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.instruments[1].enabled = false;
        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_instruments().count(), 1);
    }

    #[test]
    fn test_parse_toml_with_instrument_tables() {
        let text = r#"
            [application]
            log_level = "debug"
            log_format = "json"

            [runner]
            completion_timeout_secs = 600

            [[instruments]]
            id = "pol"
            role = "polarizer"
            driver = "mock_rotator"
            config = { degrees_per_sec = 45.0 }

            [[instruments]]
            id = "keithley1"
            role = "source_meter1"
            driver = "mock_source_meter"
        "#;
        let config: WorklistConfig = Figment::new()
            .merge(Toml::string(text))
            .extract()
            .unwrap();
        assert_eq!(config.application.log_format, OutputFormat::Json);
        assert_eq!(
            config.runner.settings().completion_timeout,
            Some(Duration::from_secs(600))
        );
        assert_eq!(config.instruments.len(), 2);
        assert_eq!(config.instruments[1].role, InstrumentRole::SourceMeter1);
        assert!(config.instruments[1].config.is_table());
        assert!(config.validate().is_ok());
    }
}
