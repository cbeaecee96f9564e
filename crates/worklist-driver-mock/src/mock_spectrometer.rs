//! Mock FTIR spectrometer.

use crate::common::Link;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use worklist_core::capabilities::Spectrometer;
use worklist_core::driver::{Capability, DeviceComponents, DriverFactory};
use worklist_core::error::{DriverErrorKind, DriverResult};
use worklist_core::types::{ExperimentSlot, ExportRequest, Illumination, ScanMode};

// =============================================================================
// MockSpectrometerFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockSpectrometer
#[derive(Debug, Clone, Deserialize)]
pub struct MockSpectrometerConfig {
    /// Display name (default: "mock_spectrometer")
    #[serde(default = "default_name")]
    pub name: String,

    /// Time one scan takes in ms (default: 0)
    #[serde(default)]
    pub scan_ms: u64,

    /// Time one export takes in ms (default: 0)
    #[serde(default)]
    pub export_ms: u64,
}

fn default_name() -> String {
    "mock_spectrometer".to_string()
}

impl Default for MockSpectrometerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            scan_ms: 0,
            export_ms: 0,
        }
    }
}

/// Factory for creating MockSpectrometer instances.
pub struct MockSpectrometerFactory;

static MOCK_SPECTROMETER_CAPABILITIES: &[Capability] = &[Capability::Spectrometer];

impl DriverFactory for MockSpectrometerFactory {
    fn driver_type(&self) -> &'static str {
        "mock_spectrometer"
    }

    fn name(&self) -> &'static str {
        "Mock FTIR Spectrometer"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_SPECTROMETER_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _cfg: MockSpectrometerConfig = config.clone().try_into()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockSpectrometerConfig =
                config.try_into().context("Invalid mock spectrometer config")?;
            Ok(DeviceComponents::new()
                .with_spectrometer(Arc::new(MockSpectrometer::with_config(cfg))))
        })
    }
}

// =============================================================================
// MockSpectrometer
// =============================================================================

/// One call received by the mock spectrometer.
#[derive(Debug, Clone, PartialEq)]
pub enum SpectrometerCall {
    /// `scan(mode, slot)`
    Scan(ScanMode, ExperimentSlot),
    /// `export(request)`
    Export(ExportRequest),
    /// `set_illumination(light)`
    Illumination(Illumination),
}

/// Simulated spectrometer that records every call.
pub struct MockSpectrometer {
    name: String,
    scan_time: Duration,
    export_time: Duration,
    calls: Mutex<Vec<SpectrometerCall>>,
    link: Link,
}

impl MockSpectrometer {
    /// Spectrometer with default configuration.
    pub fn new() -> Self {
        Self::with_config(MockSpectrometerConfig::default())
    }

    /// Spectrometer with custom configuration.
    pub fn with_config(config: MockSpectrometerConfig) -> Self {
        Self {
            name: config.name,
            scan_time: Duration::from_millis(config.scan_ms),
            export_time: Duration::from_millis(config.export_ms),
            calls: Mutex::new(Vec::new()),
            link: Link::default(),
        }
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<SpectrometerCall> {
        self.calls.lock().clone()
    }

    /// Plug or unplug the simulated device.
    pub fn set_connected(&self, connected: bool) {
        self.link.set_connected(connected);
    }

    /// Fail the next call with `kind`.
    pub fn fail_next(&self, kind: DriverErrorKind, message: &str) {
        self.link.fail_next(kind, message);
    }

    fn record(&self, call: SpectrometerCall) {
        self.calls.lock().push(call);
    }
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Spectrometer for MockSpectrometer {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn scan(&self, mode: ScanMode, slot: ExperimentSlot) -> DriverResult<()> {
        self.link.check(&self.name)?;
        tracing::debug!(device = %self.name, mode = mode.label(), slot = slot.xpm_label(), "Mock scan");
        tokio::time::sleep(self.scan_time).await;
        self.record(SpectrometerCall::Scan(mode, slot));
        Ok(())
    }

    async fn export(&self, request: &ExportRequest) -> DriverResult<()> {
        self.link.check(&self.name)?;
        tracing::debug!(device = %self.name, title = %request.title, "Mock export");
        tokio::time::sleep(self.export_time).await;
        self.record(SpectrometerCall::Export(request.clone()));
        Ok(())
    }

    async fn set_illumination(&self, illumination: Illumination) -> DriverResult<()> {
        self.link.check(&self.name)?;
        self.record(SpectrometerCall::Illumination(illumination));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls() {
        let spectrometer = MockSpectrometer::new();
        spectrometer
            .scan(ScanMode::Background, ExperimentSlot::First)
            .await
            .unwrap();
        spectrometer
            .set_illumination(Illumination::Visible(40))
            .await
            .unwrap();

        assert_eq!(
            spectrometer.calls(),
            vec![
                SpectrometerCall::Scan(ScanMode::Background, ExperimentSlot::First),
                SpectrometerCall::Illumination(Illumination::Visible(40)),
            ]
        );
    }

    #[tokio::test]
    async fn test_injected_failure_is_not_recorded() {
        let spectrometer = MockSpectrometer::new();
        spectrometer.fail_next(DriverErrorKind::Hardware, "detector saturated");
        let err = spectrometer
            .scan(ScanMode::Sample, ExperimentSlot::Second)
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
        assert!(spectrometer.calls().is_empty());
    }
}
