//! Mock source-measure unit.

use crate::common::Link;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use worklist_core::capabilities::SourceMeter;
use worklist_core::driver::{Capability, DeviceComponents, DriverFactory};
use worklist_core::error::{DriverError, DriverErrorKind, DriverResult};
use worklist_core::types::SourceMode;

// =============================================================================
// MockSourceMeterFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockSourceMeter
#[derive(Debug, Clone, Deserialize)]
pub struct MockSourceMeterConfig {
    /// Display name (default: "mock_source_meter")
    #[serde(default = "default_name")]
    pub name: String,

    /// Output relay state at start (default: true)
    #[serde(default = "default_output_enabled")]
    pub output_enabled: bool,

    /// Voltage protection limit in V (default: 21.0)
    #[serde(default = "default_voltage_limit")]
    pub voltage_limit: f64,

    /// Current protection limit in A (default: 0.105)
    #[serde(default = "default_current_limit")]
    pub current_limit: f64,
}

fn default_name() -> String {
    "mock_source_meter".to_string()
}

fn default_output_enabled() -> bool {
    true
}

fn default_voltage_limit() -> f64 {
    21.0
}

fn default_current_limit() -> f64 {
    0.105
}

impl Default for MockSourceMeterConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            output_enabled: default_output_enabled(),
            voltage_limit: default_voltage_limit(),
            current_limit: default_current_limit(),
        }
    }
}

/// Factory for creating MockSourceMeter instances.
pub struct MockSourceMeterFactory;

static MOCK_SOURCE_METER_CAPABILITIES: &[Capability] = &[Capability::SourceMeter];

impl DriverFactory for MockSourceMeterFactory {
    fn driver_type(&self) -> &'static str {
        "mock_source_meter"
    }

    fn name(&self) -> &'static str {
        "Mock Source Meter"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_SOURCE_METER_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockSourceMeterConfig = config.clone().try_into()?;
        if cfg.voltage_limit <= 0.0 || cfg.current_limit <= 0.0 {
            return Err(anyhow!("Source meter limits must be positive"));
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockSourceMeterConfig =
                config.try_into().context("Invalid mock source meter config")?;
            Ok(DeviceComponents::new()
                .with_source_meter(Arc::new(MockSourceMeter::with_config(cfg))))
        })
    }
}

// =============================================================================
// MockSourceMeter
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct Levels {
    voltage: f64,
    current: f64,
}

/// Simulated source meter that records every level it is given.
///
/// Levels beyond the protection limit are refused the way the instrument
/// refuses them.
pub struct MockSourceMeter {
    name: String,
    output_enabled: AtomicBool,
    voltage_limit: f64,
    current_limit: f64,
    levels: Mutex<Levels>,
    history: Mutex<Vec<(SourceMode, f64)>>,
    link: Link,
}

impl MockSourceMeter {
    /// Source meter with default configuration.
    pub fn new() -> Self {
        Self::with_config(MockSourceMeterConfig::default())
    }

    /// Source meter with custom configuration.
    pub fn with_config(config: MockSourceMeterConfig) -> Self {
        Self {
            name: config.name,
            output_enabled: AtomicBool::new(config.output_enabled),
            voltage_limit: config.voltage_limit,
            current_limit: config.current_limit,
            levels: Mutex::new(Levels::default()),
            history: Mutex::new(Vec::new()),
            link: Link::default(),
        }
    }

    /// Rename the device.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Every level set, in order.
    pub fn history(&self) -> Vec<(SourceMode, f64)> {
        self.history.lock().clone()
    }

    /// Switch the output relay.
    pub fn set_output_enabled(&self, enabled: bool) {
        self.output_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Plug or unplug the simulated device.
    pub fn set_connected(&self, connected: bool) {
        self.link.set_connected(connected);
    }

    /// Fail the next call with `kind`.
    pub fn fail_next(&self, kind: DriverErrorKind, message: &str) {
        self.link.fail_next(kind, message);
    }

    fn limit_for(&self, mode: SourceMode) -> f64 {
        match mode {
            SourceMode::Voltage => self.voltage_limit,
            SourceMode::Current => self.current_limit,
        }
    }
}

impl Default for MockSourceMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceMeter for MockSourceMeter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn output_enabled(&self) -> DriverResult<bool> {
        self.link.check(&self.name)?;
        Ok(self.output_enabled.load(Ordering::Relaxed))
    }

    async fn limit(&self, mode: SourceMode) -> DriverResult<f64> {
        self.link.check(&self.name)?;
        Ok(self.limit_for(mode))
    }

    async fn level(&self, mode: SourceMode) -> DriverResult<f64> {
        self.link.check(&self.name)?;
        let levels = self.levels.lock();
        Ok(match mode {
            SourceMode::Voltage => levels.voltage,
            SourceMode::Current => levels.current,
        })
    }

    async fn set_level(&self, mode: SourceMode, value: f64) -> DriverResult<()> {
        self.link.check(&self.name)?;
        if value.abs() > self.limit_for(mode) {
            return Err(DriverError::new(
                self.name.as_str(),
                DriverErrorKind::InvalidParameter,
                format!(
                    "{} {} exceeds limit {} {}",
                    value,
                    mode.unit(),
                    self.limit_for(mode),
                    mode.unit()
                ),
            ));
        }
        {
            let mut levels = self.levels.lock();
            match mode {
                SourceMode::Voltage => levels.voltage = value,
                SourceMode::Current => levels.current = value,
            }
        }
        self.history.lock().push((mode, value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_level_records_history() {
        let meter = MockSourceMeter::new();
        meter.set_level(SourceMode::Voltage, 0.5).await.unwrap();
        meter.set_level(SourceMode::Voltage, 1.0).await.unwrap();

        assert_eq!(meter.level(SourceMode::Voltage).await.unwrap(), 1.0);
        assert_eq!(meter.level(SourceMode::Current).await.unwrap(), 0.0);
        assert_eq!(
            meter.history(),
            vec![(SourceMode::Voltage, 0.5), (SourceMode::Voltage, 1.0)]
        );
    }

    #[tokio::test]
    async fn test_level_above_limit_refused() {
        let meter = MockSourceMeter::new();
        let err = meter.set_level(SourceMode::Current, 1.0).await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
        assert!(meter.history().is_empty());
    }

    #[tokio::test]
    async fn test_output_relay() {
        let meter = MockSourceMeter::new();
        assert!(meter.output_enabled().await.unwrap());
        meter.set_output_enabled(false);
        assert!(!meter.output_enabled().await.unwrap());
    }
}
