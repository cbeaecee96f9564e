//! Mock instruments for lab_worklist
//!
//! Simulated devices for running and testing worklists without hardware.
//! All timing uses `tokio::time`, so tests can run them under a paused clock.
//!
//! # Available Mock Drivers
//!
//! - [`MockRotator`] - rotation mount that reports `Moving` until it arrives
//! - [`MockTemperatureController`] - first-order thermal model with optional noise and scripted readings
//! - [`MockTranslator`] - XYZ stage that interpolates position during a move
//! - [`MockSpectrometer`] - records scans, exports and illumination changes
//! - [`MockSourceMeter`] - records every level it is set to, enforces limits
//!
//! Every mock can be unplugged (`set_connected(false)`) or armed to fail its
//! next call (`fail_next`).
//!
//! # Driver Factory Pattern
//!
//! ```rust,ignore
//! builder.register_factory(Box::new(MockRotatorFactory));
//! builder.register_factory(Box::new(MockTemperatureFactory));
//! ```

pub mod common;
mod mock_rotator;
mod mock_source_meter;
mod mock_spectrometer;
mod mock_temperature;
mod mock_translator;

pub use common::{FaultSwitch, Link, MockRng};
pub use mock_rotator::{MockRotator, MockRotatorConfig, MockRotatorFactory};
pub use mock_source_meter::{MockSourceMeter, MockSourceMeterConfig, MockSourceMeterFactory};
pub use mock_spectrometer::{
    MockSpectrometer, MockSpectrometerConfig, MockSpectrometerFactory, SpectrometerCall,
};
pub use mock_temperature::{
    MockTemperatureConfig, MockTemperatureController, MockTemperatureFactory,
};
pub use mock_translator::{MockTranslator, MockTranslatorConfig, MockTranslatorFactory};

use worklist_core::driver::DriverFactory;

/// One factory per mock driver type.
pub fn factories() -> Vec<Box<dyn DriverFactory>> {
    vec![
        Box::new(MockRotatorFactory),
        Box::new(MockTemperatureFactory),
        Box::new(MockTranslatorFactory),
        Box::new(MockSpectrometerFactory),
        Box::new(MockSourceMeterFactory),
    ]
}
