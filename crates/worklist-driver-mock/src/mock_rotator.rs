//! Mock rotation mount.

use crate::common::Link;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use worklist_core::capabilities::Rotator;
use worklist_core::driver::{Capability, DeviceComponents, DriverFactory};
use worklist_core::error::{DriverErrorKind, DriverResult};
use worklist_core::types::RotatorState;

// =============================================================================
// MockRotatorFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockRotator driver
#[derive(Debug, Clone, Deserialize)]
pub struct MockRotatorConfig {
    /// Display name (default: "mock_rotator")
    #[serde(default = "default_name")]
    pub name: String,

    /// Initial position in degrees (default: 0.0)
    #[serde(default)]
    pub initial_position: f64,

    /// Rotation speed; zero or negative moves instantly (default: 90.0)
    #[serde(default = "default_degrees_per_sec")]
    pub degrees_per_sec: f64,
}

fn default_name() -> String {
    "mock_rotator".to_string()
}

fn default_degrees_per_sec() -> f64 {
    90.0
}

impl Default for MockRotatorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            initial_position: 0.0,
            degrees_per_sec: default_degrees_per_sec(),
        }
    }
}

/// Factory for creating MockRotator instances.
pub struct MockRotatorFactory;

static MOCK_ROTATOR_CAPABILITIES: &[Capability] = &[Capability::Rotator];

impl DriverFactory for MockRotatorFactory {
    fn driver_type(&self) -> &'static str {
        "mock_rotator"
    }

    fn name(&self) -> &'static str {
        "Mock Rotation Mount"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_ROTATOR_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockRotatorConfig = config.clone().try_into()?;
        if !cfg.initial_position.is_finite() {
            return Err(anyhow!("Initial position must be finite"));
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockRotatorConfig = config.try_into().context("Invalid mock rotator config")?;
            Ok(DeviceComponents::new().with_rotator(Arc::new(MockRotator::with_config(cfg))))
        })
    }
}

// =============================================================================
// MockRotator
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Motion {
    from: f64,
    to: f64,
    started: Instant,
    duration: Duration,
}

impl Motion {
    fn fraction_done(&self) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (self.started.elapsed().as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    fn position(&self) -> f64 {
        self.from + (self.to - self.from) * self.fraction_done()
    }

    fn is_done(&self) -> bool {
        self.fraction_done() >= 1.0
    }
}

/// Simulated rotation mount.
///
/// A move takes `|delta| / degrees_per_sec` of tokio time; the controller
/// reports `Moving` until then and `Ready` afterwards.
///
/// # Example
///
/// ```rust,ignore
/// let rotator = MockRotator::new();
/// rotator.move_abs(90.0).await?;
/// while !rotator.controller_state().await?.is_ready() {
///     tokio::time::sleep(Duration::from_millis(50)).await;
/// }
/// ```
pub struct MockRotator {
    name: String,
    degrees_per_sec: f64,
    motion: Mutex<Motion>,
    held_state: Mutex<Option<RotatorState>>,
    moves: Mutex<Vec<f64>>,
    link: Link,
}

impl MockRotator {
    /// Rotator with default configuration.
    pub fn new() -> Self {
        Self::with_config(MockRotatorConfig::default())
    }

    /// Rotator with custom configuration.
    pub fn with_config(config: MockRotatorConfig) -> Self {
        Self {
            name: config.name,
            degrees_per_sec: config.degrees_per_sec,
            motion: Mutex::new(Motion {
                from: config.initial_position,
                to: config.initial_position,
                started: Instant::now(),
                duration: Duration::ZERO,
            }),
            held_state: Mutex::new(None),
            moves: Mutex::new(Vec::new()),
            link: Link::default(),
        }
    }

    /// Rename the device.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Every accepted move target, in order.
    pub fn moves(&self) -> Vec<f64> {
        self.moves.lock().clone()
    }

    /// Report `state` regardless of motion until cleared with `None`.
    pub fn hold_state(&self, state: Option<RotatorState>) {
        *self.held_state.lock() = state;
    }

    /// Plug or unplug the simulated device.
    pub fn set_connected(&self, connected: bool) {
        self.link.set_connected(connected);
    }

    /// Fail the next call with `kind`.
    pub fn fail_next(&self, kind: DriverErrorKind, message: &str) {
        self.link.fail_next(kind, message);
    }

    fn travel_time(&self, distance: f64) -> Duration {
        if self.degrees_per_sec <= 0.0 || !self.degrees_per_sec.is_finite() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(distance.abs() / self.degrees_per_sec)
    }
}

impl Default for MockRotator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Rotator for MockRotator {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn move_abs(&self, degrees: f64) -> DriverResult<()> {
        self.link.check(&self.name)?;
        let mut motion = self.motion.lock();
        let from = motion.position();
        *motion = Motion {
            from,
            to: degrees,
            started: Instant::now(),
            duration: self.travel_time(degrees - from),
        };
        self.moves.lock().push(degrees);
        tracing::debug!(device = %self.name, from, to = degrees, "Mock rotator move");
        Ok(())
    }

    async fn controller_state(&self) -> DriverResult<RotatorState> {
        self.link.check(&self.name)?;
        if let Some(state) = *self.held_state.lock() {
            return Ok(state);
        }
        if self.motion.lock().is_done() {
            Ok(RotatorState::Ready)
        } else {
            Ok(RotatorState::Moving)
        }
    }

    async fn position(&self) -> DriverResult<Option<f64>> {
        self.link.check(&self.name)?;
        Ok(Some(self.motion.lock().position()))
    }
}
