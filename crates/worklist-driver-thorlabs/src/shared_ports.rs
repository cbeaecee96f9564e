//! Shared port management for the Elliptec RS-485 bus.
//!
//! A polarizer and an analyzer mount usually hang off the same USB adapter
//! with different bus addresses. Opening the adapter twice fails, so open
//! ports are kept in a process-wide registry keyed by path.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use worklist_core::error::DriverResult;
use worklist_core::serial::{open_serial_async, wrap_shared, SharedPort};

/// Elliptec bus speed.
pub const ELLIPTEC_BAUD: u32 = 9600;

static SHARED_PORTS: OnceLock<RwLock<HashMap<String, SharedPort>>> = OnceLock::new();

fn port_registry() -> &'static RwLock<HashMap<String, SharedPort>> {
    SHARED_PORTS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Port already open for `port_path`, if any.
pub fn get_existing_port(port_path: &str) -> Option<SharedPort> {
    port_registry().read().get(port_path).cloned()
}

/// Record an open port so later devices on the same bus reuse it.
pub fn register_port(port_path: &str, port: SharedPort) {
    port_registry().write().insert(port_path.to_string(), port);
    tracing::info!(port = port_path, "Registered Elliptec shared port");
}

/// Forget a port, e.g. after it stopped responding.
pub fn remove_port(port_path: &str) -> bool {
    let removed = port_registry().write().remove(port_path).is_some();
    if removed {
        tracing::info!(port = port_path, "Removed stale Elliptec shared port");
    }
    removed
}

/// Reuse the open port for `port_path` or open and register a new one.
///
/// A cached port is flushed first; if that fails or hangs it is dropped and
/// reopened.
pub async fn get_or_open_port(port_path: &str, timeout: Duration) -> DriverResult<SharedPort> {
    if let Some(port) = get_existing_port(port_path) {
        let health_check = async {
            let mut guard = port.lock().await;
            guard.get_mut().flush().await
        };

        match tokio::time::timeout(Duration::from_millis(100), health_check).await {
            Ok(Ok(())) => {
                tracing::debug!(port = port_path, "Reusing Elliptec shared port");
                return Ok(port);
            }
            Ok(Err(e)) => {
                tracing::warn!(port = port_path, error = %e, "Shared port health check failed, reopening");
                remove_port(port_path);
            }
            Err(_) => {
                tracing::warn!(port = port_path, "Shared port health check timed out, reopening");
                remove_port(port_path);
            }
        }
    }

    let stream = open_serial_async(port_path, ELLIPTEC_BAUD, timeout, "Elliptec bus").await?;
    let shared = wrap_shared(Box::new(stream));
    register_port(port_path, shared.clone());
    Ok(shared)
}

/// Number of ports currently registered.
pub fn port_count() -> usize {
    SHARED_PORTS.get().map(|r| r.read().len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        let (_host, device) = tokio::io::duplex(16);
        register_port("/dev/test-elliptec", wrap_shared(Box::new(device)));
        assert!(get_existing_port("/dev/test-elliptec").is_some());
        assert!(port_count() >= 1);

        assert!(remove_port("/dev/test-elliptec"));
        assert!(!remove_port("/dev/test-elliptec"));
        assert!(get_existing_port("/dev/test-elliptec").is_none());
    }

    #[tokio::test]
    async fn test_healthy_port_is_reused() {
        let (_host, device) = tokio::io::duplex(16);
        let shared = wrap_shared(Box::new(device));
        register_port("/dev/test-elliptec-reuse", shared.clone());

        let reused = get_or_open_port("/dev/test-elliptec-reuse", Duration::from_millis(100))
            .await
            .unwrap();
        assert!(std::sync::Arc::ptr_eq(&shared, &reused));

        remove_port("/dev/test-elliptec-reuse");
    }
}
