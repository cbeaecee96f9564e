//! Newport single-axis rotation stage controller.
//!
//! Protocol: RS-232, 921600 baud, 8N1, ASCII commands terminated by CR LF.
//! Commands are `{axis}{mnemonic}{value}`. Query replies echo the axis and
//! mnemonic before the value, e.g. `1TP?` answers `1TP45.0000`.
//!
//! | command      | meaning                              |
//! |--------------|--------------------------------------|
//! | `1PA<deg>`   | move absolute                        |
//! | `1PR<deg>`   | move relative                        |
//! | `1TP?`       | current position                     |
//! | `1mm?`       | controller state code                |
//! | `1mm1/1mm0`  | leave/enter DISABLE                  |
//! | `1OR`        | home (reference) the stage           |
//! | `1SL?/1SR?`  | software travel limits               |
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB2"
//! };
//! let components = NewportRotatorFactory.build(config.into()).await?;
//! ```

use anyhow::Context;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use worklist_core::capabilities::Rotator;
use worklist_core::driver::{Capability, DeviceComponents, DriverFactory};
use worklist_core::error::{DriverError, DriverErrorKind, DriverResult};
use worklist_core::retry::RetryPolicy;
use worklist_core::serial::{open_serial_async, query_line, wrap_shared, write_line, SharedPort};
use worklist_core::types::RotatorState;

/// Controller line speed.
pub const NEWPORT_BAUD: u32 = 921_600;

// =============================================================================
// Controller states
// =============================================================================

/// Map a `MM` state code to a normalised state and the controller's own label.
///
/// Codes are the two hex digits after the echoed `1MM`. Unknown codes give
/// `None`.
pub fn controller_state_from_code(code: &str) -> Option<(RotatorState, &'static str)> {
    let code = code.trim().to_ascii_lowercase();
    let entry = match code.as_str() {
        "a" => (RotatorState::NotReferenced, "NOT REFERENCED"),
        "0a" => (RotatorState::NotReferenced, "NOT REFERENCED from reset"),
        "0b" => (RotatorState::NotReferenced, "NOT REFERENCED from HOMING"),
        "0c" => (RotatorState::NotReferenced, "NOT REFERENCED from CONFIGURATION"),
        "0d" => (RotatorState::NotReferenced, "NOT REFERENCED from DISABLE"),
        "0e" => (RotatorState::NotReferenced, "NOT REFERENCED from READY"),
        "0f" => (RotatorState::NotReferenced, "NOT REFERENCED from MOVING"),
        "10" => (RotatorState::NotReferenced, "NOT REFERENCED no parameters"),
        "14" => (RotatorState::Configuration, "CONFIGURATION"),
        "1e" => (RotatorState::Homing, "HOMING"),
        "28" => (RotatorState::Moving, "MOVING"),
        "32" => (RotatorState::Ready, "READY from HOMING"),
        "33" => (RotatorState::Ready, "READY from MOVING"),
        "34" => (RotatorState::Ready, "READY from DISABLE"),
        "3c" => (RotatorState::Disabled, "DISABLE from READY"),
        "3d" => (RotatorState::Disabled, "DISABLE from MOVING"),
        _ => return None,
    };
    Some(entry)
}

/// Strip the echoed `{axis}{mnemonic}` header from a query reply.
fn reply_value(reply: &str, axis: u8) -> Option<&str> {
    let header = axis.to_string().len() + 2;
    reply.get(header..).map(str::trim)
}

// =============================================================================
// NewportRotatorFactory - DriverFactory implementation
// =============================================================================

/// Configuration for the Newport rotator driver.
#[derive(Debug, Clone, Deserialize)]
pub struct NewportRotatorConfig {
    /// Serial port path (e.g., "/dev/ttyUSB2")
    pub port: String,
    /// Controller address
    #[serde(default = "default_axis")]
    pub axis: u8,
    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Display name, defaults to `newport@<port>`
    #[serde(default)]
    pub name: Option<String>,
    /// Reply timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Send `OR` when the controller is not READY at connect time
    #[serde(default = "default_home_if_not_ready")]
    pub home_if_not_ready: bool,
}

fn default_axis() -> u8 {
    1
}

fn default_baud_rate() -> u32 {
    NEWPORT_BAUD
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_home_if_not_ready() -> bool {
    true
}

/// Factory for creating Newport rotator driver instances.
pub struct NewportRotatorFactory;

static NEWPORT_ROTATOR_CAPABILITIES: &[Capability] = &[Capability::Rotator];

impl DriverFactory for NewportRotatorFactory {
    fn driver_type(&self) -> &'static str {
        "newport_rotator"
    }

    fn name(&self) -> &'static str {
        "Newport Rotation Stage Controller"
    }

    fn capabilities(&self) -> &'static [Capability] {
        NEWPORT_ROTATOR_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> anyhow::Result<()> {
        let cfg: NewportRotatorConfig = config.clone().try_into()?;
        if !(1..=31).contains(&cfg.axis) {
            anyhow::bail!("Newport controller address must be 1-31, got {}", cfg.axis);
        }
        if cfg.timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be positive");
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, anyhow::Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: NewportRotatorConfig =
                config.try_into().context("Invalid Newport rotator config")?;
            let timeout = Duration::from_millis(cfg.timeout_ms);
            let name = cfg
                .name
                .clone()
                .unwrap_or_else(|| format!("newport@{}", cfg.port));

            let stream = open_serial_async(&cfg.port, cfg.baud_rate, timeout, &name).await?;
            let mut driver = NewportRotator::new(wrap_shared(Box::new(stream)), cfg.axis)
                .with_name(name)
                .with_timeout(timeout);
            driver.initialize(cfg.home_if_not_ready).await?;

            Ok(DeviceComponents::new().with_rotator(Arc::new(driver)))
        })
    }
}

// =============================================================================
// NewportRotator
// =============================================================================

/// Driver for one Newport rotation stage controller.
pub struct NewportRotator {
    name: String,
    port: SharedPort,
    axis: u8,
    timeout: Duration,
    retry: RetryPolicy,
    limits: Option<(f64, f64)>,
    connected: AtomicBool,
}

impl NewportRotator {
    /// Driver for the controller at `axis` on an already open port.
    pub fn new(port: SharedPort, axis: u8) -> Self {
        Self {
            name: format!("newport#{}", axis),
            port,
            axis,
            timeout: Duration::from_millis(1000),
            retry: RetryPolicy::default(),
            limits: None,
            connected: AtomicBool::new(true),
        }
    }

    /// Override the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Software travel limits read at connect time, `(left, right)`.
    pub fn limits(&self) -> Option<(f64, f64)> {
        self.limits
    }

    /// Home the stage if needed and read its travel limits.
    ///
    /// Limits that cannot be read leave moves unchecked.
    pub async fn initialize(&mut self, home_if_not_ready: bool) -> DriverResult<()> {
        let state = self.controller_state().await?;
        if !state.is_ready() && home_if_not_ready {
            tracing::info!(device = %self.name, %state, "Controller not ready, homing");
            self.home().await?;
        }

        let left = self.query_value("SL?").await;
        let right = self.query_value("SR?").await;
        match (left, right) {
            (Ok(Some(left)), Ok(Some(right))) => {
                tracing::info!(device = %self.name, left, right, "Read travel limits");
                self.limits = Some((left, right));
            }
            (left, right) => {
                tracing::warn!(
                    device = %self.name,
                    ?left,
                    ?right,
                    "Travel limits unavailable, moves are not range checked"
                );
            }
        }
        Ok(())
    }

    /// Start a homing search.
    pub async fn home(&self) -> DriverResult<()> {
        self.send("OR").await
    }

    /// Move relative to the current position.
    #[instrument(skip(self), fields(axis = self.axis))]
    pub async fn move_rel(&self, degrees: f64) -> DriverResult<()> {
        self.send(&format!("PR{}", degrees)).await
    }

    /// Leave (`true`) or enter (`false`) the DISABLE state.
    pub async fn set_enabled(&self, enabled: bool) -> DriverResult<()> {
        self.send(if enabled { "mm1" } else { "mm0" }).await
    }

    async fn query(&self, mnemonic: &str) -> DriverResult<String> {
        let command = format!("{}{}", self.axis, mnemonic);
        let command = command.as_str();
        let result = self
            .retry
            .run(&self.name, mnemonic, move || {
                query_line(&self.port, &self.name, command, self.timeout)
            })
            .await;
        self.track(result)
    }

    /// Query a numeric value, `None` if the reply does not parse.
    async fn query_value(&self, mnemonic: &str) -> DriverResult<Option<f64>> {
        let reply = self.query(mnemonic).await?;
        let value = reply_value(&reply, self.axis).and_then(|v| v.parse::<f64>().ok());
        if value.is_none() {
            tracing::warn!(device = %self.name, command = mnemonic, response = %reply, "Unparseable reply");
        }
        Ok(value)
    }

    async fn send(&self, mnemonic: &str) -> DriverResult<()> {
        let command = format!("{}{}", self.axis, mnemonic);
        let command = command.as_str();
        let result = self
            .retry
            .run(&self.name, mnemonic, move || {
                write_line(&self.port, &self.name, command)
            })
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
}

#[async_trait]
impl Rotator for NewportRotator {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    #[instrument(skip(self), fields(axis = self.axis))]
    async fn move_abs(&self, degrees: f64) -> DriverResult<()> {
        if let Some((left, right)) = self.limits {
            if degrees < left || degrees > right {
                return Err(DriverError::new(
                    self.name.as_str(),
                    DriverErrorKind::InvalidParameter,
                    format!("{} deg outside travel limits [{}, {}]", degrees, left, right),
                ));
            }
        }
        self.send(&format!("PA{}", degrees)).await
    }

    async fn controller_state(&self) -> DriverResult<RotatorState> {
        let reply = self.query("mm?").await?;
        let code = reply_value(&reply, self.axis).unwrap_or_default();
        match controller_state_from_code(code) {
            Some((state, label)) => {
                tracing::trace!(device = %self.name, code, label, "Controller state");
                Ok(state)
            }
            None => {
                tracing::debug!(device = %self.name, response = %reply, "Unknown controller state code");
                Ok(RotatorState::Unknown)
            }
        }
    }

    #[instrument(skip(self), fields(axis = self.axis))]
    async fn position(&self) -> DriverResult<Option<f64>> {
        self.query_value("TP?").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn test_driver() -> (DuplexStream, NewportRotator) {
        let (host, device) = tokio::io::duplex(256);
        let driver = NewportRotator::new(wrap_shared(Box::new(device)), 1)
            .with_timeout(Duration::from_millis(200))
            .with_retry(RetryPolicy::NONE);
        (host, driver)
    }

    /// Serve scripted replies, one per received command, and return what was sent.
    fn serve(mut host: DuplexStream, replies: Vec<&'static str>) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for reply in replies {
                let mut buf = [0u8; 64];
                let n = host.read(&mut buf).await.unwrap();
                seen.push(String::from_utf8_lossy(&buf[..n]).to_string());
                if !reply.is_empty() {
                    host.write_all(reply.as_bytes()).await.unwrap();
                }
            }
            seen
        })
    }

    #[test]
    fn test_state_table() {
        assert_eq!(
            controller_state_from_code("33"),
            Some((RotatorState::Ready, "READY from MOVING"))
        );
        assert_eq!(controller_state_from_code("28").unwrap().0, RotatorState::Moving);
        assert_eq!(controller_state_from_code("1E").unwrap().0, RotatorState::Homing);
        assert_eq!(controller_state_from_code("0A").unwrap().0, RotatorState::NotReferenced);
        assert_eq!(controller_state_from_code("a").unwrap().0, RotatorState::NotReferenced);
        assert_eq!(controller_state_from_code("3D").unwrap().0, RotatorState::Disabled);
        assert_eq!(controller_state_from_code("14").unwrap().0, RotatorState::Configuration);
        assert!(controller_state_from_code("99").is_none());
    }

    #[test]
    fn test_reply_value_strips_echo() {
        assert_eq!(reply_value("1TP45.5", 1), Some("45.5"));
        assert_eq!(reply_value("12MM33", 12), Some("33"));
        assert_eq!(reply_value("1T", 1), None);
    }

    #[test]
    fn test_factory_validate() {
        let factory = NewportRotatorFactory;
        assert_eq!(factory.driver_type(), "newport_rotator");
        assert_eq!(factory.capabilities(), &[Capability::Rotator]);

        let ok = toml::toml! { port = "/dev/ttyUSB2" };
        assert!(factory.validate(&ok.into()).is_ok());

        let bad_axis = toml::toml! {
            port = "/dev/ttyUSB2"
            axis = 0
        };
        assert!(factory.validate(&bad_axis.into()).is_err());
    }

    #[tokio::test]
    async fn test_move_abs_writes_command() {
        let (host, driver) = test_driver();
        let server = serve(host, vec![""]);

        driver.move_abs(45.0).await.unwrap();
        assert_eq!(server.await.unwrap(), vec!["1PA45\r\n"]);
    }

    #[tokio::test]
    async fn test_controller_state_and_position() {
        let (host, driver) = test_driver();
        let server = serve(host, vec!["1MM28\r\n", "1MM33\r\n", "1TP12.25\r\n"]);

        assert_eq!(driver.controller_state().await.unwrap(), RotatorState::Moving);
        assert_eq!(driver.controller_state().await.unwrap(), RotatorState::Ready);
        assert_eq!(driver.position().await.unwrap(), Some(12.25));

        let sent = server.await.unwrap();
        assert_eq!(sent, vec!["1mm?\r\n", "1mm?\r\n", "1TP?\r\n"]);
    }

    #[tokio::test]
    async fn test_unparseable_position_is_none() {
        let (host, driver) = test_driver();
        let server = serve(host, vec!["1TPerr\r\n"]);

        assert_eq!(driver.position().await.unwrap(), None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_homes_and_reads_limits() {
        let (host, mut driver) = test_driver();
        let server = serve(host, vec!["1MM0A\r\n", "", "1SL-170\r\n", "1SR170\r\n"]);

        driver.initialize(true).await.unwrap();
        assert_eq!(driver.limits(), Some((-170.0, 170.0)));

        let sent = server.await.unwrap();
        assert_eq!(sent[1], "1OR\r\n");

        let err = driver.move_abs(200.0).await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
    }

    #[tokio::test]
    async fn test_closed_port_marks_disconnected() {
        let (host, driver) = test_driver();
        drop(host);

        let err = driver.controller_state().await.unwrap_err();
        assert!(err.is_connection());
        assert!(!driver.is_connected());
    }
}
