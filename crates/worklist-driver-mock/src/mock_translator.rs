//! Mock XYZ translation stage.

use crate::common::Link;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use worklist_core::capabilities::Translator;
use worklist_core::driver::{Capability, DeviceComponents, DriverFactory};
use worklist_core::error::{DriverErrorKind, DriverResult};
use worklist_core::types::Position3;

// =============================================================================
// MockTranslatorFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockTranslator
#[derive(Debug, Clone, Deserialize)]
pub struct MockTranslatorConfig {
    /// Display name (default: "mock_translator")
    #[serde(default = "default_name")]
    pub name: String,

    /// Starting position in µm
    #[serde(default)]
    pub initial_position: [f64; 3],

    /// Travel speed along the longest axis; zero moves instantly (default: 2000.0)
    #[serde(default = "default_speed")]
    pub um_per_sec: f64,

    /// Drift correction reported for reference-relative moves, in µm
    #[serde(default)]
    pub reference_offset: [f64; 3],
}

fn default_name() -> String {
    "mock_translator".to_string()
}

fn default_speed() -> f64 {
    2000.0
}

impl Default for MockTranslatorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            initial_position: [0.0; 3],
            um_per_sec: default_speed(),
            reference_offset: [0.0; 3],
        }
    }
}

/// Factory for creating MockTranslator instances.
pub struct MockTranslatorFactory;

static MOCK_TRANSLATOR_CAPABILITIES: &[Capability] = &[Capability::Translator];

impl DriverFactory for MockTranslatorFactory {
    fn driver_type(&self) -> &'static str {
        "mock_translator"
    }

    fn name(&self) -> &'static str {
        "Mock XYZ Stage"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_TRANSLATOR_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockTranslatorConfig = config.clone().try_into()?;
        if cfg.um_per_sec < 0.0 {
            return Err(anyhow!("um_per_sec cannot be negative"));
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockTranslatorConfig =
                config.try_into().context("Invalid mock translator config")?;
            Ok(DeviceComponents::new()
                .with_translator(Arc::new(MockTranslator::with_config(cfg))))
        })
    }
}

// =============================================================================
// MockTranslator
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Travel {
    from: Position3,
    to: Position3,
    started: Instant,
    duration: Duration,
}

impl Travel {
    fn position(&self) -> Position3 {
        if self.duration.is_zero() {
            return self.to;
        }
        let f = (self.started.elapsed().as_secs_f64() / self.duration.as_secs_f64()).min(1.0);
        Position3::new(
            self.from.x + (self.to.x - self.from.x) * f,
            self.from.y + (self.to.y - self.from.y) * f,
            self.from.z + (self.to.z - self.from.z) * f,
        )
    }
}

/// Simulated three-axis stage.
///
/// Positions interpolate linearly while a move is in progress, so two
/// samples taken a few milliseconds apart differ until the stage arrives.
pub struct MockTranslator {
    name: String,
    um_per_sec: f64,
    travel: Mutex<Travel>,
    reference_offset: Mutex<Position3>,
    targets: Mutex<Vec<Position3>>,
    link: Link,
}

impl MockTranslator {
    /// Stage with default configuration.
    pub fn new() -> Self {
        Self::with_config(MockTranslatorConfig::default())
    }

    /// Stage with custom configuration.
    pub fn with_config(config: MockTranslatorConfig) -> Self {
        let [x, y, z] = config.initial_position;
        let start = Position3::new(x, y, z);
        let [ox, oy, oz] = config.reference_offset;
        Self {
            name: config.name,
            um_per_sec: config.um_per_sec,
            travel: Mutex::new(Travel {
                from: start,
                to: start,
                started: Instant::now(),
                duration: Duration::ZERO,
            }),
            reference_offset: Mutex::new(Position3::new(ox, oy, oz)),
            targets: Mutex::new(Vec::new()),
            link: Link::default(),
        }
    }

    /// Every move target, in order, after offsets were applied.
    pub fn targets(&self) -> Vec<Position3> {
        self.targets.lock().clone()
    }

    /// Change the drift correction.
    pub fn set_reference_offset(&self, offset: Position3) {
        *self.reference_offset.lock() = offset;
    }

    /// Plug or unplug the simulated device.
    pub fn set_connected(&self, connected: bool) {
        self.link.set_connected(connected);
    }

    /// Fail the next call with `kind`.
    pub fn fail_next(&self, kind: DriverErrorKind, message: &str) {
        self.link.fail_next(kind, message);
    }

    fn start_travel(&self, target: Position3) {
        let mut travel = self.travel.lock();
        let from = travel.position();
        let longest = (target.x - from.x)
            .abs()
            .max((target.y - from.y).abs())
            .max((target.z - from.z).abs());
        let duration = if self.um_per_sec > 0.0 && self.um_per_sec.is_finite() {
            Duration::from_secs_f64(longest / self.um_per_sec)
        } else {
            Duration::ZERO
        };
        *travel = Travel {
            from,
            to: target,
            started: Instant::now(),
            duration,
        };
        self.targets.lock().push(target);
        tracing::debug!(device = %self.name, %from, to = %target, "Mock stage move");
    }
}

impl Default for MockTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Translator for MockTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn move_abs(&self, target: Position3) -> DriverResult<()> {
        self.link.check(&self.name)?;
        self.start_travel(target);
        Ok(())
    }

    async fn move_rel(&self, offset: Position3) -> DriverResult<()> {
        self.link.check(&self.name)?;
        let destination = self.travel.lock().to + offset;
        self.start_travel(destination);
        Ok(())
    }

    async fn position(&self) -> DriverResult<Position3> {
        self.link.check(&self.name)?;
        Ok(self.travel.lock().position())
    }

    async fn reference_offset(&self) -> DriverResult<Position3> {
        self.link.check(&self.name)?;
        Ok(*self.reference_offset.lock())
    }
}
