//! Thorlabs Elliptec ELL14 Rotation Mount Driver
//!
//! Protocol: RS-485 multidrop bus, 9600 baud, ASCII encoded.
//! Frames are `<address><op><payload>` and are sent terminated by CR LF.
//!
//! | op   | request            | reply                  |
//! |------|--------------------|------------------------|
//! | `ma` | 8 hex digit steps  | `PO<hex>` when arrived |
//! | `gs` | none               | `GS<code>`, `00` idle  |
//! | `gp` | none               | `PO<hex>`              |
//! | `in` | none               | `IN<device info>`      |
//!
//! Step counts are signed 32-bit values written as zero-padded upper-case
//! hex. Degrees convert with `steps = round(degrees * steps_per_degree)`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB1"
//!     address = "0"
//! };
//! let components = Ell14Factory.build(config.into()).await?;
//! ```

use crate::shared_ports::get_or_open_port;
use anyhow::Context;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::instrument;
use worklist_core::capabilities::Rotator;
use worklist_core::driver::{Capability, DeviceComponents, DriverFactory};
use worklist_core::error::{DriverError, DriverErrorKind, DriverResult};
use worklist_core::retry::RetryPolicy;
use worklist_core::serial::{drain_serial_buffer, SharedPort};
use worklist_core::types::RotatorState;

/// Steps per degree used by the lab's mounts.
pub const DEFAULT_STEPS_PER_DEGREE: f64 = 398.2;

/// Factory calibration of an ELL14: 143360 steps per revolution.
pub const ELL14_FACTORY_STEPS_PER_DEGREE: f64 = 143_360.0 / 360.0;

/// Calibration of 51200-step-per-revolution mounts.
pub const FINE_STEPS_PER_DEGREE: f64 = 51_200.0 / 360.0;

// =============================================================================
// Angle conversion
// =============================================================================

/// Encode an angle as the 8 digit hex step count used by `ma`.
///
/// Negative angles are written in two's complement.
pub fn degrees_to_hex(degrees: f64, steps_per_degree: f64) -> String {
    let steps = (degrees * steps_per_degree).round() as i64 as i32;
    format!("{:08X}", steps as u32)
}

/// Decode an 8 digit hex step count back to degrees.
///
/// Returns `None` unless `hex` is exactly eight hex digits.
pub fn hex_to_degrees(hex: &str, steps_per_degree: f64) -> Option<f64> {
    if hex.len() != 8 || steps_per_degree <= 0.0 {
        return None;
    }
    let raw = u32::from_str_radix(hex, 16).ok()?;
    Some(f64::from(raw as i32) / steps_per_degree)
}

// =============================================================================
// Ell14Factory - DriverFactory implementation
// =============================================================================

/// Configuration for the ELL14 driver.
#[derive(Debug, Clone, Deserialize)]
pub struct Ell14Config {
    /// Serial port path (e.g., "/dev/ttyUSB1")
    pub port: String,
    /// Device address on the bus (0-9, A-F)
    pub address: String,
    /// Display name, defaults to `ell14@<address>`
    #[serde(default)]
    pub name: Option<String>,
    /// Steps per degree
    #[serde(default = "default_steps_per_degree")]
    pub steps_per_degree: f64,
    /// Read the calibration from the device instead of `steps_per_degree`
    #[serde(default)]
    pub calibrate: bool,
    /// Reply timeout in milliseconds
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

fn default_steps_per_degree() -> f64 {
    DEFAULT_STEPS_PER_DEGREE
}

fn default_reply_timeout_ms() -> u64 {
    500
}

impl Ell14Config {
    fn check(&self) -> anyhow::Result<()> {
        let mut chars = self.address.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_hexdigit() => {}
            _ => anyhow::bail!("ELL14 address must be one hex digit, got '{}'", self.address),
        }
        if self.steps_per_degree <= 0.0 {
            anyhow::bail!("steps_per_degree must be positive");
        }
        Ok(())
    }
}

/// Factory for creating ELL14 driver instances.
pub struct Ell14Factory;

static ELL14_CAPABILITIES: &[Capability] = &[Capability::Rotator];

impl DriverFactory for Ell14Factory {
    fn driver_type(&self) -> &'static str {
        "ell14"
    }

    fn name(&self) -> &'static str {
        "Thorlabs ELL14 Rotation Mount"
    }

    fn capabilities(&self) -> &'static [Capability] {
        ELL14_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> anyhow::Result<()> {
        let cfg: Ell14Config = config.clone().try_into()?;
        cfg.check()
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, anyhow::Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: Ell14Config = config.try_into().context("Invalid ELL14 config")?;
            cfg.check()?;

            let timeout = Duration::from_millis(cfg.reply_timeout_ms);
            let port = get_or_open_port(&cfg.port, timeout).await?;
            let name = cfg
                .name
                .clone()
                .unwrap_or_else(|| format!("ell14@{}", cfg.address));

            let mut driver = Ell14Driver::new(port, &cfg.address, cfg.steps_per_degree)
                .with_name(name)
                .with_reply_timeout(timeout);
            if cfg.calibrate {
                driver.calibrate().await?;
            }

            Ok(DeviceComponents::new().with_rotator(Arc::new(driver)))
        })
    }
}

// =============================================================================
// ELL14 Status Codes
// =============================================================================

/// Status codes returned in `GS` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ell14StatusCode {
    /// Idle, no error
    Ok = 0x00,
    /// Communication timeout
    CommunicationTimeout = 0x01,
    /// Mechanical timeout
    MechanicalTimeout = 0x02,
    /// Command not understood
    CommandError = 0x03,
    /// Value out of range
    ValueOutOfRange = 0x04,
    /// Module isolated
    ModuleIsolated = 0x05,
    /// Module out of isolation
    ModuleOutOfIsolation = 0x06,
    /// Initialisation error
    InitializationError = 0x07,
    /// Thermal error
    ThermalError = 0x08,
    /// Moving
    Busy = 0x09,
    /// Sensor error
    SensorError = 0x0A,
    /// Motor error
    MotorError = 0x0B,
    /// Position out of range
    OutOfRange = 0x0C,
    /// Over current
    OverCurrentError = 0x0D,
    /// Anything else
    Unknown = 0xFF,
}

impl Ell14StatusCode {
    /// Decode a two digit hex status.
    pub fn from_hex(hex: &str) -> Self {
        match u8::from_str_radix(hex, 16) {
            Ok(0x00) => Self::Ok,
            Ok(0x01) => Self::CommunicationTimeout,
            Ok(0x02) => Self::MechanicalTimeout,
            Ok(0x03) => Self::CommandError,
            Ok(0x04) => Self::ValueOutOfRange,
            Ok(0x05) => Self::ModuleIsolated,
            Ok(0x06) => Self::ModuleOutOfIsolation,
            Ok(0x07) => Self::InitializationError,
            Ok(0x08) => Self::ThermalError,
            Ok(0x09) => Self::Busy,
            Ok(0x0A) => Self::SensorError,
            Ok(0x0B) => Self::MotorError,
            Ok(0x0C) => Self::OutOfRange,
            Ok(0x0D) => Self::OverCurrentError,
            _ => Self::Unknown,
        }
    }

    /// Normalised controller state.
    pub fn to_state(self) -> RotatorState {
        match self {
            Self::Ok => RotatorState::Ready,
            Self::Busy => RotatorState::Moving,
            Self::Unknown => RotatorState::Unknown,
            _ => RotatorState::Fault,
        }
    }
}

// =============================================================================
// Ell14Driver
// =============================================================================

/// Driver for one Elliptec ELL14 mount on a shared bus.
pub struct Ell14Driver {
    name: String,
    port: SharedPort,
    address: String,
    steps_per_degree: f64,
    reply_timeout: Duration,
    retry: RetryPolicy,
    connected: AtomicBool,
}

impl Ell14Driver {
    /// Driver for the mount at `address` on an already open port.
    pub fn new(port: SharedPort, address: &str, steps_per_degree: f64) -> Self {
        Self {
            name: format!("ell14@{}", address),
            port,
            address: address.to_string(),
            steps_per_degree,
            reply_timeout: Duration::from_millis(500),
            retry: RetryPolicy::default(),
            connected: AtomicBool::new(true),
        }
    }

    /// Override the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bus address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Active calibration.
    pub fn steps_per_degree(&self) -> f64 {
        self.steps_per_degree
    }

    /// Replace the calibration with the one stored on the device.
    ///
    /// The last 8 characters of the `IN` reply are the steps per revolution.
    /// An implausible value keeps the current calibration.
    pub async fn calibrate(&mut self) -> DriverResult<()> {
        let reply = self.request("in", &["IN"]).await?;
        let parsed = reply
            .get(reply.len().saturating_sub(8)..)
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .map(|steps_per_rev| f64::from(steps_per_rev) / 360.0);

        match parsed {
            Some(spd) if spd > 100.0 && spd < 1000.0 => {
                tracing::info!(address = %self.address, steps_per_degree = spd, "Calibrated ELL14");
                self.steps_per_degree = spd;
            }
            _ => {
                tracing::warn!(
                    address = %self.address,
                    reply = %reply,
                    "Unusable IN reply, keeping configured calibration"
                );
            }
        }
        Ok(())
    }

    /// Send `op` and return the first reply body starting with one of `expect`.
    ///
    /// Replies addressed to other devices and unsolicited `PO` frames left
    /// over from earlier moves are skipped.
    #[instrument(skip(self, expect), fields(address = %self.address))]
    async fn transaction(&self, op: &str, expect: &[&str]) -> DriverResult<String> {
        let command = format!("{}{}", self.address, op);
        let mut guard = self.port.lock().await;

        let discarded = drain_serial_buffer(guard.get_mut(), 5).await;
        if discarded > 0 {
            tracing::trace!(discarded, "Cleared pending bus data before ELL14 command");
        }

        let writer = guard.get_mut();
        writer
            .write_all(format!("{}\r\n", command).as_bytes())
            .await
            .map_err(|e| DriverError::io(self.name.as_str(), &e))?;
        writer
            .flush()
            .await
            .map_err(|e| DriverError::io(self.name.as_str(), &e))?;

        let deadline = tokio::time::Instant::now() + self.reply_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let mut line = String::new();
            let read = tokio::time::timeout(remaining, guard.read_line(&mut line))
                .await
                .map_err(|_| {
                    DriverError::new(
                        self.name.as_str(),
                        DriverErrorKind::Timeout,
                        format!("no reply to '{}'", command),
                    )
                })?
                .map_err(|e| DriverError::io(self.name.as_str(), &e))?;

            if read == 0 {
                return Err(DriverError::new(
                    self.name.as_str(),
                    DriverErrorKind::Connection,
                    "port closed",
                ));
            }

            let reply = line.trim();
            if let Some(body) = reply.strip_prefix(self.address.as_str()) {
                if expect.iter().any(|prefix| body.starts_with(prefix)) {
                    tracing::debug!(cmd = %command, response = %reply, "ELL14 transaction");
                    return Ok(body.to_string());
                }
            }
            tracing::trace!(cmd = %command, skipped = %reply, "Ignoring unrelated ELL14 frame");
        }
    }

    /// [`transaction`](Self::transaction) with bounded retries and link tracking.
    async fn request(&self, op: &str, expect: &[&str]) -> DriverResult<String> {
        let result = self
            .retry
            .run(&self.name, op, move || self.transaction(op, expect))
            .await;
        self.track(result)
    }

    fn track<T>(&self, result: DriverResult<T>) -> DriverResult<T> {
        match &result {
            Ok(_) => self.connected.store(true, Ordering::Relaxed),
            Err(e) if e.is_connection() => self.connected.store(false, Ordering::Relaxed),
            Err(_) => {}
        }
        result
    }

    /// Write a command that is answered only once motion ends.
    async fn send(&self, op: &str) -> DriverResult<()> {
        let command = format!("{}{}\r\n", self.address, op);
        let frame = command.as_bytes();
        let result = self
            .retry
            .run(&self.name, op, move || async move {
                let mut guard = self.port.lock().await;
                let writer = guard.get_mut();
                writer
                    .write_all(frame)
                    .await
                    .map_err(|e| DriverError::io(self.name.as_str(), &e))?;
                writer
                    .flush()
                    .await
                    .map_err(|e| DriverError::io(self.name.as_str(), &e))
            })
            .await;
        self.track(result)
    }

    /// Read the status register.
    pub async fn get_status(&self) -> DriverResult<Ell14StatusCode> {
        let body = self.request("gs", &["GS"]).await?;
        match body.get(2..4) {
            Some(hex) => Ok(Ell14StatusCode::from_hex(hex)),
            None => {
                tracing::debug!(address = %self.address, response = %body, "Short GS reply");
                Ok(Ell14StatusCode::Unknown)
            }
        }
    }
}

#[async_trait]
impl Rotator for Ell14Driver {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    #[instrument(skip(self), fields(address = %self.address))]
    async fn move_abs(&self, degrees: f64) -> DriverResult<()> {
        let hex = degrees_to_hex(degrees, self.steps_per_degree);
        self.send(&format!("ma{}", hex)).await
    }

    async fn controller_state(&self) -> DriverResult<RotatorState> {
        let status = self.get_status().await?;
        if status.to_state() == RotatorState::Fault {
            tracing::warn!(address = %self.address, ?status, "ELL14 reports an error status");
        }
        Ok(status.to_state())
    }

    #[instrument(skip(self), fields(address = %self.address))]
    async fn position(&self) -> DriverResult<Option<f64>> {
        let body = self.request("gp", &["PO"]).await?;
        let degrees = body
            .get(2..)
            .and_then(|hex| hex_to_degrees(hex.trim(), self.steps_per_degree));
        if degrees.is_none() {
            tracing::warn!(address = %self.address, response = %body, "Unparseable ELL14 position");
        }
        Ok(degrees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use worklist_core::serial::wrap_shared;

    fn test_driver() -> (DuplexStream, Ell14Driver) {
        let (host, device) = tokio::io::duplex(256);
        let driver = Ell14Driver::new(wrap_shared(Box::new(device)), "0", DEFAULT_STEPS_PER_DEGREE)
            .with_reply_timeout(Duration::from_millis(200))
            .with_retry(RetryPolicy {
                attempts: 2,
                backoff: Duration::from_millis(1),
            });
        (host, driver)
    }

    /// Answer one request on the fake bus.
    async fn reply_once(host: &mut DuplexStream, reply: &str) -> String {
        let mut buf = [0u8; 64];
        let n = host.read(&mut buf).await.unwrap();
        host.write_all(reply.as_bytes()).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[test]
    fn test_degrees_to_hex_ninety() {
        // round(90 * 398.2) = 35838 = 0x8BFE
        assert_eq!(degrees_to_hex(90.0, DEFAULT_STEPS_PER_DEGREE), "00008BFE");
        assert_eq!(degrees_to_hex(0.0, DEFAULT_STEPS_PER_DEGREE), "00000000");
    }

    #[test]
    fn test_negative_angles_use_twos_complement() {
        let hex = degrees_to_hex(-1.0, DEFAULT_STEPS_PER_DEGREE);
        assert_eq!(hex, "FFFFFE72");
        let back = hex_to_degrees(&hex, DEFAULT_STEPS_PER_DEGREE).unwrap();
        assert!((back + 1.0).abs() < 1.0 / DEFAULT_STEPS_PER_DEGREE);
    }

    #[test]
    fn test_angle_round_trip_within_one_step() {
        for spd in [
            DEFAULT_STEPS_PER_DEGREE,
            ELL14_FACTORY_STEPS_PER_DEGREE,
            FINE_STEPS_PER_DEGREE,
        ] {
            let mut d = 0.0;
            while d < 360.0 {
                let back = hex_to_degrees(&degrees_to_hex(d, spd), spd).unwrap();
                assert!((back - d).abs() <= 1.0 / spd, "{} -> {} at {}", d, back, spd);
                d += 0.37;
            }
        }
    }

    #[test]
    fn test_hex_to_degrees_rejects_bad_input() {
        assert!(hex_to_degrees("8BFE", DEFAULT_STEPS_PER_DEGREE).is_none());
        assert!(hex_to_degrees("0000ZZZZ", DEFAULT_STEPS_PER_DEGREE).is_none());
        assert!(hex_to_degrees("00008BFE", 0.0).is_none());
    }

    #[test]
    fn test_status_code_parsing() {
        assert_eq!(Ell14StatusCode::from_hex("00").to_state(), RotatorState::Ready);
        assert_eq!(Ell14StatusCode::from_hex("09").to_state(), RotatorState::Moving);
        assert_eq!(
            Ell14StatusCode::from_hex("02"),
            Ell14StatusCode::MechanicalTimeout
        );
        assert_eq!(Ell14StatusCode::from_hex("02").to_state(), RotatorState::Fault);
        assert_eq!(Ell14StatusCode::from_hex("zz"), Ell14StatusCode::Unknown);
    }

    #[tokio::test]
    async fn test_move_abs_writes_command() {
        let (mut host, driver) = test_driver();

        driver.move_abs(90.0).await.unwrap();

        let mut buf = [0u8; 64];
        let n = host.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"0ma00008BFE\r\n");
    }

    #[tokio::test]
    async fn test_controller_state_ready_and_moving() {
        let (mut host, driver) = test_driver();

        let responder = tokio::spawn(async move {
            let first = reply_once(&mut host, "0GS09\r\n").await;
            let second = reply_once(&mut host, "0GS00\r\n").await;
            (first, second, host)
        });

        assert_eq!(driver.controller_state().await.unwrap(), RotatorState::Moving);
        assert_eq!(driver.controller_state().await.unwrap(), RotatorState::Ready);

        let (first, second, _host) = responder.await.unwrap();
        assert_eq!(first, "0gs\r\n");
        assert_eq!(second, "0gs\r\n");
    }

    #[tokio::test]
    async fn test_other_addresses_are_skipped() {
        let (mut host, driver) = test_driver();

        let responder = tokio::spawn(async move {
            reply_once(&mut host, "1GS09\r\n0PO00008BFE\r\n0GS00\r\n").await;
            host
        });

        assert_eq!(driver.controller_state().await.unwrap(), RotatorState::Ready);
        let _host = responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_position_parses_reply() {
        let (mut host, driver) = test_driver();

        let responder = tokio::spawn(async move {
            reply_once(&mut host, "0PO00008BFE\r\n").await;
            host
        });

        let degrees = driver.position().await.unwrap().unwrap();
        assert!((degrees - 90.0).abs() < 1.0 / DEFAULT_STEPS_PER_DEGREE);
        let _host = responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_unparseable_position_is_none() {
        let (mut host, driver) = test_driver();

        let responder = tokio::spawn(async move {
            reply_once(&mut host, "0POgarbage\r\n").await;
            host
        });

        assert_eq!(driver.position().await.unwrap(), None);
        let _host = responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_device_drops_link_after_retries() {
        let (_host, driver) = test_driver();

        let err = driver.controller_state().await.unwrap_err();
        assert!(err.is_connection());
        assert!(err.message.contains("after 2 attempts"), "{}", err);
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn test_closed_port_marks_disconnected() {
        let (host, driver) = test_driver();
        drop(host);

        let err = driver.controller_state().await.unwrap_err();
        assert!(err.is_connection());
        assert!(!driver.is_connected());
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = Ell14Factory;
        assert_eq!(factory.driver_type(), "ell14");
        assert!(factory.capabilities().contains(&Capability::Rotator));

        let valid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB1"
            address = "2"
        });
        assert!(factory.validate(&valid).is_ok());

        let bad_address = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB1"
            address = "12"
        });
        assert!(factory.validate(&bad_address).is_err());

        let missing_port = toml::Value::Table(toml::toml! {
            address = "2"
        });
        assert!(factory.validate(&missing_port).is_err());
    }
}
