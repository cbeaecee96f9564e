//! Driver Factory and Component Types
//!
//! Drivers implement [`DriverFactory`] and are registered with the instrument
//! set builder at startup. A factory turns one `[[instruments]]` TOML table
//! into a [`DeviceComponents`] bag holding whichever capability trait objects
//! the driver provides.
//!
//! # Example: Implementing a Driver Factory
//!
//! ```rust,ignore
//! pub struct Ell14Factory;
//!
//! impl DriverFactory for Ell14Factory {
//!     fn driver_type(&self) -> &'static str { "ell14" }
//!     fn name(&self) -> &'static str { "Thorlabs ELL14 Rotation Mount" }
//!     fn capabilities(&self) -> &'static [Capability] { &[Capability::Rotator] }
//!
//!     fn validate(&self, config: &toml::Value) -> anyhow::Result<()> {
//!         let _: Ell14Config = config.clone().try_into()?;
//!         Ok(())
//!     }
//!
//!     fn build(&self, config: toml::Value) -> BoxFuture<'static, anyhow::Result<DeviceComponents>> {
//!         Box::pin(async move {
//!             let cfg: Ell14Config = config.try_into()?;
//!             let driver = Arc::new(Ell14Driver::open(&cfg).await?);
//!             Ok(DeviceComponents::new().with_rotator(driver))
//!         })
//!     }
//! }
//! ```

use crate::capabilities::{Rotator, SourceMeter, Spectrometer, TemperatureController, Translator};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Capability Enum (Runtime Introspection)
// =============================================================================

/// Runtime capability flags, one per capability trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Corresponds to [`crate::capabilities::Rotator`]
    Rotator,
    /// Corresponds to [`crate::capabilities::TemperatureController`]
    TemperatureController,
    /// Corresponds to [`crate::capabilities::Translator`]
    Translator,
    /// Corresponds to [`crate::capabilities::Spectrometer`]
    Spectrometer,
    /// Corresponds to [`crate::capabilities::SourceMeter`]
    SourceMeter,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rotator => "Rotator",
            Self::TemperatureController => "Temperature Controller",
            Self::Translator => "Translator",
            Self::Spectrometer => "Spectrometer",
            Self::SourceMeter => "Source Meter",
        }
    }
}

// =============================================================================
// Device Components (Capability Bag)
// =============================================================================

/// Container for the capability trait objects a driver returns.
#[derive(Default)]
pub struct DeviceComponents {
    /// Rotation mount
    pub rotator: Option<Arc<dyn Rotator>>,
    /// Temperature controller
    pub temperature: Option<Arc<dyn TemperatureController>>,
    /// XYZ stage
    pub translator: Option<Arc<dyn Translator>>,
    /// Spectrometer
    pub spectrometer: Option<Arc<dyn Spectrometer>>,
    /// Source meter
    pub source_meter: Option<Arc<dyn SourceMeter>>,
}

impl DeviceComponents {
    /// Empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rotator.
    pub fn with_rotator(mut self, rotator: Arc<dyn Rotator>) -> Self {
        self.rotator = Some(rotator);
        self
    }

    /// Add a temperature controller.
    pub fn with_temperature(mut self, controller: Arc<dyn TemperatureController>) -> Self {
        self.temperature = Some(controller);
        self
    }

    /// Add a translation stage.
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Add a spectrometer.
    pub fn with_spectrometer(mut self, spectrometer: Arc<dyn Spectrometer>) -> Self {
        self.spectrometer = Some(spectrometer);
        self
    }

    /// Add a source meter.
    pub fn with_source_meter(mut self, meter: Arc<dyn SourceMeter>) -> Self {
        self.source_meter = Some(meter);
        self
    }

    /// Capabilities actually present in this bag.
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.rotator.is_some() {
            caps.push(Capability::Rotator);
        }
        if self.temperature.is_some() {
            caps.push(Capability::TemperatureController);
        }
        if self.translator.is_some() {
            caps.push(Capability::Translator);
        }
        if self.spectrometer.is_some() {
            caps.push(Capability::Spectrometer);
        }
        if self.source_meter.is_some() {
            caps.push(Capability::SourceMeter);
        }
        caps
    }
}

// =============================================================================
// Driver Factory
// =============================================================================

/// Builds drivers of one type from TOML configuration.
pub trait DriverFactory: Send + Sync {
    /// Identifier used in the `driver` field of an instrument definition.
    fn driver_type(&self) -> &'static str;

    /// Human-readable driver name.
    fn name(&self) -> &'static str;

    /// Capabilities every instance of this driver provides.
    fn capabilities(&self) -> &'static [Capability];

    /// Check a configuration table without opening any hardware.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Open the device and return its capability bag.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_components_have_no_capabilities() {
        assert!(DeviceComponents::new().capabilities().is_empty());
    }

    #[test]
    fn test_capability_names() {
        assert_eq!(Capability::SourceMeter.name(), "Source Meter");
        assert_eq!(Capability::Rotator.name(), "Rotator");
    }
}
