//! Mock cryostat temperature controller.

use crate::common::{Link, MockRng};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use worklist_core::capabilities::TemperatureController;
use worklist_core::driver::{Capability, DeviceComponents, DriverFactory};
use worklist_core::error::{DriverErrorKind, DriverResult};

// =============================================================================
// MockTemperatureFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockTemperatureController
#[derive(Debug, Clone, Deserialize)]
pub struct MockTemperatureConfig {
    /// Display name (default: "mock_temperature")
    #[serde(default = "default_name")]
    pub name: String,

    /// Starting sample temperature in K (default: 295.0)
    #[serde(default = "default_initial_kelvin")]
    pub initial_kelvin: f64,

    /// Fraction of the remaining gap closed per reading (default: 0.5)
    #[serde(default = "default_approach")]
    pub approach: f64,

    /// Peak reading noise in K (default: 0.0)
    #[serde(default)]
    pub noise_kelvin: f64,

    /// RNG seed for reproducible noise
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_name() -> String {
    "mock_temperature".to_string()
}

fn default_initial_kelvin() -> f64 {
    295.0
}

fn default_approach() -> f64 {
    0.5
}

impl Default for MockTemperatureConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            initial_kelvin: default_initial_kelvin(),
            approach: default_approach(),
            noise_kelvin: 0.0,
            seed: None,
        }
    }
}

/// Factory for creating MockTemperatureController instances.
pub struct MockTemperatureFactory;

static MOCK_TEMPERATURE_CAPABILITIES: &[Capability] = &[Capability::TemperatureController];

impl DriverFactory for MockTemperatureFactory {
    fn driver_type(&self) -> &'static str {
        "mock_temperature"
    }

    fn name(&self) -> &'static str {
        "Mock Temperature Controller"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_TEMPERATURE_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockTemperatureConfig = config.clone().try_into()?;
        if !(0.0..=1.0).contains(&cfg.approach) {
            return Err(anyhow!("approach must be within 0-1, got {}", cfg.approach));
        }
        if cfg.initial_kelvin < 0.0 {
            return Err(anyhow!("initial_kelvin cannot be negative"));
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockTemperatureConfig =
                config.try_into().context("Invalid mock temperature config")?;
            Ok(DeviceComponents::new()
                .with_temperature(Arc::new(MockTemperatureController::with_config(cfg))))
        })
    }
}

// =============================================================================
// MockTemperatureController
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Thermal {
    temperature: f64,
    setpoint: f64,
}

/// Simulated temperature controller.
///
/// Each reading moves the sample a fixed fraction of the way to the
/// setpoint. Tests can queue exact readings with
/// [`script`](Self::script); queued values are served first.
pub struct MockTemperatureController {
    name: String,
    approach: f64,
    noise_kelvin: f64,
    thermal: Mutex<Thermal>,
    scripted: Mutex<VecDeque<Option<f64>>>,
    setpoints: Mutex<Vec<f64>>,
    rng: MockRng,
    link: Link,
}

impl MockTemperatureController {
    /// Controller with default configuration.
    pub fn new() -> Self {
        Self::with_config(MockTemperatureConfig::default())
    }

    /// Controller with custom configuration.
    pub fn with_config(config: MockTemperatureConfig) -> Self {
        Self {
            name: config.name,
            approach: config.approach.clamp(0.0, 1.0),
            noise_kelvin: config.noise_kelvin,
            thermal: Mutex::new(Thermal {
                temperature: config.initial_kelvin,
                setpoint: config.initial_kelvin,
            }),
            scripted: Mutex::new(VecDeque::new()),
            setpoints: Mutex::new(Vec::new()),
            rng: MockRng::new(config.seed),
            link: Link::default(),
        }
    }

    /// Queue exact readings; `None` simulates an unreadable sensor.
    pub fn script(&self, readings: impl IntoIterator<Item = Option<f64>>) {
        self.scripted.lock().extend(readings);
    }

    /// Every setpoint requested, in order.
    pub fn setpoints(&self) -> Vec<f64> {
        self.setpoints.lock().clone()
    }

    /// Current modelled temperature without noise.
    pub fn true_temperature(&self) -> f64 {
        self.thermal.lock().temperature
    }

    /// Plug or unplug the simulated device.
    pub fn set_connected(&self, connected: bool) {
        self.link.set_connected(connected);
    }

    /// Fail the next call with `kind`.
    pub fn fail_next(&self, kind: DriverErrorKind, message: &str) {
        self.link.fail_next(kind, message);
    }
}

impl Default for MockTemperatureController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemperatureController for MockTemperatureController {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn set_setpoint(&self, kelvin: f64) -> DriverResult<()> {
        self.link.check(&self.name)?;
        self.thermal.lock().setpoint = kelvin;
        self.setpoints.lock().push(kelvin);
        tracing::debug!(device = %self.name, kelvin, "Mock setpoint");
        Ok(())
    }

    async fn temperature(&self) -> DriverResult<Option<f64>> {
        self.link.check(&self.name)?;
        if let Some(reading) = self.scripted.lock().pop_front() {
            if let Some(kelvin) = reading {
                self.thermal.lock().temperature = kelvin;
            }
            return Ok(reading);
        }

        let mut thermal = self.thermal.lock();
        thermal.temperature += (thermal.setpoint - thermal.temperature) * self.approach;
        Ok(Some(thermal.temperature + self.rng.noise(self.noise_kelvin)))
    }
}
