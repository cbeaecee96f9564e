//! Shared plumbing for the simulated instruments.
//!
//! - [`MockRng`]: seeded RNG so noisy readings are reproducible in tests
//! - [`FaultSwitch`]: arm a one-shot failure on the next device call
//! - [`Link`]: connected flag that every mock checks before touching state

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use worklist_core::error::{DriverError, DriverErrorKind, DriverResult};

// =============================================================================
// Seeded RNG
// =============================================================================

/// Seeded RNG wrapper for reproducible random behavior.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// RNG with the given seed, or seeded from the OS when `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Uniform noise in `[-amplitude, amplitude]`.
    pub fn noise(&self, amplitude: f64) -> f64 {
        if amplitude <= 0.0 {
            return 0.0;
        }
        self.inner.lock().gen_range(-amplitude..=amplitude)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

// =============================================================================
// Fault injection
// =============================================================================

/// One-shot failure armed by a test.
#[derive(Debug, Default)]
pub struct FaultSwitch {
    armed: Mutex<Option<(DriverErrorKind, String)>>,
}

impl FaultSwitch {
    /// Fail the next call with `kind`.
    pub fn arm(&self, kind: DriverErrorKind, message: impl Into<String>) {
        *self.armed.lock() = Some((kind, message.into()));
    }

    /// Consume the armed failure, if any.
    pub fn check(&self, device: &str) -> DriverResult<()> {
        match self.armed.lock().take() {
            Some((kind, message)) => Err(DriverError::new(device, kind, message)),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Link state
// =============================================================================

/// Simulated connection state plus armed faults.
#[derive(Debug)]
pub struct Link {
    connected: AtomicBool,
    faults: FaultSwitch,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(true),
            faults: FaultSwitch::default(),
        }
    }
}

impl Link {
    /// Whether the simulated device is reachable.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Plug or unplug the simulated device.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Arm a one-shot failure.
    pub fn fail_next(&self, kind: DriverErrorKind, message: impl Into<String>) {
        self.faults.arm(kind, message);
    }

    /// Gate a device call: unplugged devices and armed faults fail it.
    pub fn check(&self, device: &str) -> DriverResult<()> {
        if !self.is_connected() {
            return Err(DriverError::not_connected(device));
        }
        self.faults.check(device)
    }
}
