//! The instrument set a worklist runs against.
//!
//! [`Instruments`] holds one capability trait object per role and is handed
//! to the runner at construction. It is assembled either directly (tests,
//! embedding) or from `[[instruments]]` configuration through the registered
//! [`DriverFactory`] implementations.

use crate::config::{InstrumentDefinition, WorklistConfig};
use crate::error::{WorklistError, WorklistResult};
use crate::experiment::command::RotatorRole;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use worklist_core::capabilities::{
    Rotator, SourceMeter, Spectrometer, TemperatureController, Translator,
};
use worklist_core::driver::{Capability, DeviceComponents, DriverFactory};
use worklist_core::error::{DriverError, DriverErrorKind};

// =============================================================================
// Roles
// =============================================================================

/// Role an instrument plays in worklists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentRole {
    /// Rotation mount before the sample
    Polarizer,
    /// Rotation mount after the sample
    Analyzer,
    /// Cryostat controller
    Temperature,
    /// XYZ stage
    Translator,
    /// FTIR spectrometer
    Spectrometer,
    /// First source meter
    SourceMeter1,
    /// Second source meter
    SourceMeter2,
}

impl InstrumentRole {
    /// Every role, in display order.
    pub const ALL: [InstrumentRole; 7] = [
        InstrumentRole::Polarizer,
        InstrumentRole::Analyzer,
        InstrumentRole::Temperature,
        InstrumentRole::Translator,
        InstrumentRole::Spectrometer,
        InstrumentRole::SourceMeter1,
        InstrumentRole::SourceMeter2,
    ];

    /// Capability an instrument in this role must provide.
    pub fn capability(&self) -> Capability {
        match self {
            InstrumentRole::Polarizer | InstrumentRole::Analyzer => Capability::Rotator,
            InstrumentRole::Temperature => Capability::TemperatureController,
            InstrumentRole::Translator => Capability::Translator,
            InstrumentRole::Spectrometer => Capability::Spectrometer,
            InstrumentRole::SourceMeter1 | InstrumentRole::SourceMeter2 => {
                Capability::SourceMeter
            }
        }
    }

    /// Role of a rotator.
    pub fn rotator(role: RotatorRole) -> Self {
        match role {
            RotatorRole::Polarizer => InstrumentRole::Polarizer,
            RotatorRole::Analyzer => InstrumentRole::Analyzer,
        }
    }

    /// Role of source meter channel 1 or 2.
    pub fn source_meter(device: u8) -> Option<Self> {
        match device {
            1 => Some(InstrumentRole::SourceMeter1),
            2 => Some(InstrumentRole::SourceMeter2),
            _ => None,
        }
    }
}

impl fmt::Display for InstrumentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstrumentRole::Polarizer => "polarizer",
            InstrumentRole::Analyzer => "analyzer",
            InstrumentRole::Temperature => "temperature",
            InstrumentRole::Translator => "translator",
            InstrumentRole::Spectrometer => "spectrometer",
            InstrumentRole::SourceMeter1 => "source_meter1",
            InstrumentRole::SourceMeter2 => "source_meter2",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Instruments
// =============================================================================

/// Capability trait objects by role.
#[derive(Clone, Default)]
pub struct Instruments {
    /// Polarizer mount
    pub polarizer: Option<Arc<dyn Rotator>>,
    /// Analyzer mount
    pub analyzer: Option<Arc<dyn Rotator>>,
    /// Temperature controller
    pub temperature: Option<Arc<dyn TemperatureController>>,
    /// XYZ stage
    pub translator: Option<Arc<dyn Translator>>,
    /// Spectrometer
    pub spectrometer: Option<Arc<dyn Spectrometer>>,
    /// Source meters 1 and 2
    pub source_meters: [Option<Arc<dyn SourceMeter>>; 2],
}

fn missing(role: InstrumentRole) -> WorklistError {
    WorklistError::MissingInstrument(role.to_string())
}

impl Instruments {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rotator for a role.
    pub fn with_rotator(mut self, role: RotatorRole, rotator: Arc<dyn Rotator>) -> Self {
        match role {
            RotatorRole::Polarizer => self.polarizer = Some(rotator),
            RotatorRole::Analyzer => self.analyzer = Some(rotator),
        }
        self
    }

    /// Set the temperature controller.
    pub fn with_temperature(mut self, controller: Arc<dyn TemperatureController>) -> Self {
        self.temperature = Some(controller);
        self
    }

    /// Set the stage.
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Set the spectrometer.
    pub fn with_spectrometer(mut self, spectrometer: Arc<dyn Spectrometer>) -> Self {
        self.spectrometer = Some(spectrometer);
        self
    }

    /// Set source meter 1 or 2. Other channel numbers are ignored.
    pub fn with_source_meter(mut self, device: u8, meter: Arc<dyn SourceMeter>) -> Self {
        if let Some(slot) = self.source_meters.get_mut(usize::from(device).wrapping_sub(1)) {
            *slot = Some(meter);
        }
        self
    }

    /// Rotator for a role.
    pub fn rotator(&self, role: RotatorRole) -> WorklistResult<&Arc<dyn Rotator>> {
        let rotator = match role {
            RotatorRole::Polarizer => self.polarizer.as_ref(),
            RotatorRole::Analyzer => self.analyzer.as_ref(),
        };
        rotator.ok_or_else(|| missing(InstrumentRole::rotator(role)))
    }

    /// Temperature controller.
    pub fn temperature(&self) -> WorklistResult<&Arc<dyn TemperatureController>> {
        self.temperature
            .as_ref()
            .ok_or_else(|| missing(InstrumentRole::Temperature))
    }

    /// Stage.
    pub fn translator(&self) -> WorklistResult<&Arc<dyn Translator>> {
        self.translator
            .as_ref()
            .ok_or_else(|| missing(InstrumentRole::Translator))
    }

    /// Spectrometer.
    pub fn spectrometer(&self) -> WorklistResult<&Arc<dyn Spectrometer>> {
        self.spectrometer
            .as_ref()
            .ok_or_else(|| missing(InstrumentRole::Spectrometer))
    }

    /// Source meter 1 or 2.
    pub fn source_meter(&self, device: u8) -> WorklistResult<&Arc<dyn SourceMeter>> {
        let role = InstrumentRole::source_meter(device).ok_or_else(|| {
            WorklistError::MissingInstrument(format!("source_meter{}", device))
        })?;
        self.source_meters[usize::from(device - 1)]
            .as_ref()
            .ok_or_else(|| missing(role))
    }

    /// Whether a role has an instrument.
    pub fn has(&self, role: InstrumentRole) -> bool {
        match role {
            InstrumentRole::Polarizer => self.polarizer.is_some(),
            InstrumentRole::Analyzer => self.analyzer.is_some(),
            InstrumentRole::Temperature => self.temperature.is_some(),
            InstrumentRole::Translator => self.translator.is_some(),
            InstrumentRole::Spectrometer => self.spectrometer.is_some(),
            InstrumentRole::SourceMeter1 => self.source_meters[0].is_some(),
            InstrumentRole::SourceMeter2 => self.source_meters[1].is_some(),
        }
    }

    /// Roles that have an instrument.
    pub fn roles(&self) -> Vec<InstrumentRole> {
        InstrumentRole::ALL
            .into_iter()
            .filter(|role| self.has(*role))
            .collect()
    }

    /// Place a built driver into its role.
    fn install(&mut self, role: InstrumentRole, components: DeviceComponents) -> Option<()> {
        match role {
            InstrumentRole::Polarizer => self.polarizer = Some(components.rotator?),
            InstrumentRole::Analyzer => self.analyzer = Some(components.rotator?),
            InstrumentRole::Temperature => self.temperature = Some(components.temperature?),
            InstrumentRole::Translator => self.translator = Some(components.translator?),
            InstrumentRole::Spectrometer => self.spectrometer = Some(components.spectrometer?),
            InstrumentRole::SourceMeter1 => self.source_meters[0] = Some(components.source_meter?),
            InstrumentRole::SourceMeter2 => self.source_meters[1] = Some(components.source_meter?),
        }
        Some(())
    }
}

impl fmt::Debug for Instruments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruments")
            .field("roles", &self.roles())
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds an [`Instruments`] set from configuration.
///
/// # Example
///
/// ```rust,ignore
/// let config = WorklistConfig::load()?;
/// let instruments = InstrumentsBuilder::with_default_factories()
///     .build(&config)
///     .await?;
/// ```
pub struct InstrumentsBuilder {
    factories: HashMap<&'static str, Box<dyn DriverFactory>>,
}

impl InstrumentsBuilder {
    /// Builder with no factories.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Builder with the mock factories and whichever serial drivers were
    /// compiled in.
    pub fn with_default_factories() -> Self {
        let mut builder = Self::new();
        for factory in worklist_driver_mock::factories() {
            builder.register_factory(factory);
        }
        #[cfg(feature = "instrument_thorlabs")]
        builder.register_factory(Box::new(worklist_driver_thorlabs::Ell14Factory));
        #[cfg(feature = "instrument_newport")]
        builder.register_factory(Box::new(worklist_driver_newport::NewportRotatorFactory));
        builder
    }

    /// Register a driver factory, replacing any with the same driver type.
    pub fn register_factory(
        &mut self,
        factory: Box<dyn DriverFactory>,
    ) -> Option<Box<dyn DriverFactory>> {
        tracing::debug!(
            driver_type = factory.driver_type(),
            name = factory.name(),
            capabilities = ?factory.capabilities(),
            "Registering driver factory"
        );
        self.factories.insert(factory.driver_type(), factory)
    }

    /// Registered driver types, sorted.
    pub fn driver_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Check every enabled definition without opening hardware.
    pub fn validate(&self, config: &WorklistConfig) -> WorklistResult<()> {
        for definition in config.enabled_instruments() {
            self.factory_for(definition)?;
        }
        Ok(())
    }

    fn factory_for(&self, definition: &InstrumentDefinition) -> WorklistResult<&dyn DriverFactory> {
        let factory = self
            .factories
            .get(definition.driver.as_str())
            .ok_or_else(|| {
                WorklistError::Configuration(format!(
                    "No driver '{}' for instrument '{}'. Available drivers: {}",
                    definition.driver,
                    definition.id,
                    self.driver_types().join(", ")
                ))
            })?;

        let needed = definition.role.capability();
        if !factory.capabilities().contains(&needed) {
            return Err(WorklistError::Configuration(format!(
                "Driver '{}' cannot act as {} (needs {})",
                definition.driver,
                definition.role,
                needed.name()
            )));
        }

        factory.validate(&definition.config).map_err(|e| {
            WorklistError::Driver(DriverError::new(
                definition.id.as_str(),
                DriverErrorKind::Configuration,
                format!("Invalid configuration for driver '{}': {}", definition.driver, e),
            ))
        })?;
        Ok(factory.as_ref())
    }

    /// Validate the configuration and open every enabled instrument.
    pub async fn build(&self, config: &WorklistConfig) -> WorklistResult<Instruments> {
        config.validate()?;
        let mut instruments = Instruments::new();

        for definition in config.enabled_instruments() {
            let factory = self.factory_for(definition)?;
            let components = factory.build(definition.config.clone()).await.map_err(|e| {
                WorklistError::Driver(DriverError::new(
                    definition.id.as_str(),
                    DriverErrorKind::Connection,
                    format!("{:#}", e),
                ))
            })?;

            if instruments.install(definition.role, components).is_none() {
                return Err(WorklistError::Configuration(format!(
                    "Driver '{}' built no {} for instrument '{}'",
                    definition.driver,
                    definition.role.capability().name(),
                    definition.id
                )));
            }
            info!(id = %definition.id, role = %definition.role, driver = %definition.driver, "Instrument ready");
        }

        for instrument in config.instruments.iter().filter(|i| !i.enabled) {
            warn!(id = %instrument.id, "Instrument disabled in configuration");
        }
        Ok(instruments)
    }
}

impl Default for InstrumentsBuilder {
    fn default() -> Self {
        Self::with_default_factories()
    }
}
