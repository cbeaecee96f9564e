//! Completion predicates.
//!
//! Each command kind decides it is finished by polling its device:
//!
//! | Kind | Done when | Poll |
//! |------|-----------|------|
//! | Rotator move | controller reports ready | `rotator_poll` |
//! | Temperature | more than N consecutive in-tolerance readings | `temperature_poll` |
//! | Stage move | two readings `stage_sample_gap` apart agree | `stage_sample_gap` |
//!
//! Spectrometer and source meter commands finish when their start action
//! returns and need no predicate.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, trace};
use worklist_core::capabilities::{Rotator, TemperatureController, Translator};
use worklist_core::error::{DriverError, DriverErrorKind, DriverResult};
use worklist_core::types::RotatorState;

/// Round to two decimals, the resolution readings are compared at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whether `reading` lies within `tolerance` of `setpoint`.
pub fn in_tolerance(setpoint: f64, tolerance: f64, reading: f64) -> bool {
    (round2(reading) - round2(setpoint)).abs() <= round2(tolerance) + 1e-9
}

/// Consecutive in-tolerance reading counter.
///
/// Stable once the count exceeds the required number, so `required = 90`
/// needs 91 readings in a row. An out-of-tolerance reading resets the count.
/// A missing reading neither counts nor resets.
#[derive(Debug, Clone, PartialEq)]
pub struct StabilityCounter {
    setpoint: f64,
    tolerance: f64,
    required: u32,
    count: u32,
}

impl StabilityCounter {
    /// Counter that must exceed `required` consecutive readings.
    pub fn new(setpoint: f64, tolerance: f64, required: u32) -> Self {
        Self {
            setpoint,
            tolerance,
            required,
            count: 0,
        }
    }

    /// Consecutive in-tolerance readings so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Feed one reading; returns `true` once the temperature is stable.
    pub fn observe(&mut self, reading: Option<f64>) -> bool {
        if let Some(kelvin) = reading {
            if in_tolerance(self.setpoint, self.tolerance, kelvin) {
                self.count += 1;
            } else {
                self.count = 0;
            }
        }
        self.is_stable()
    }

    /// Whether enough consecutive readings have been seen.
    pub fn is_stable(&self) -> bool {
        self.count > self.required
    }
}

/// Poll until the rotator reports ready.
///
/// A controller fault ends the wait with a hardware error.
pub async fn rotator_ready(rotator: &dyn Rotator, interval: Duration) -> DriverResult<()> {
    loop {
        let state = rotator.controller_state().await?;
        trace!(device = rotator.name(), %state, "rotator state");
        match state {
            RotatorState::Ready => return Ok(()),
            RotatorState::Fault => {
                return Err(DriverError::new(
                    rotator.name(),
                    DriverErrorKind::Hardware,
                    "controller reported a fault",
                ))
            }
            _ => sleep(interval).await,
        }
    }
}

/// Poll until the temperature has been stable for the counter's readings.
pub async fn temperature_stable(
    controller: &dyn TemperatureController,
    mut counter: StabilityCounter,
    interval: Duration,
) -> DriverResult<()> {
    loop {
        let reading = controller.temperature().await?;
        let stable = counter.observe(reading);
        debug!(
            device = controller.name(),
            reading = ?reading,
            stable_polls = counter.count(),
            "temperature sample"
        );
        if stable {
            return Ok(());
        }
        sleep(interval).await;
    }
}

/// Sample the stage position until two readings `gap` apart agree.
pub async fn stage_settled(translator: &dyn Translator, gap: Duration) -> DriverResult<()> {
    let mut previous = translator.position().await?;
    loop {
        sleep(gap).await;
        let current = translator.position().await?;
        if current == previous {
            trace!(device = translator.name(), position = %current, "stage settled");
            return Ok(());
        }
        previous = current;
    }
}
