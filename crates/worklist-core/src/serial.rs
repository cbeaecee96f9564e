//! Async serial helpers shared by the rotator drivers.
//!
//! Requires the `serial` feature:
//!
//! ```toml
//! [dependencies]
//! worklist-core = { path = "../worklist-core", features = ["serial"] }
//! ```
//!
//! Drivers hold a [`SharedPort`] so several logical devices on one bus
//! (two Elliptec mounts on a single RS-485 adapter) serialise their
//! transactions through the same mutex. Tests substitute
//! `tokio::io::duplex` for the real port.

use crate::error::{DriverError, DriverErrorKind, DriverResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Anything that can stand in for a serial port.
///
/// Covers `tokio_serial::SerialStream` on hardware and `tokio::io::DuplexStream`
/// in tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Serial port shared between tasks, with line buffering.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Wrap a boxed port for sharing.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

// =============================================================================
// Opening ports
// =============================================================================

/// Open a serial port at 8N1 without flow control.
///
/// Port opening blocks, so it runs on the blocking pool.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    timeout: Duration,
    device_name: &str,
) -> DriverResult<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;

    let path = port_path.to_string();
    let device = device_name.to_string();

    let opened = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| {
                DriverError::new(
                    device.as_str(),
                    DriverErrorKind::Connection,
                    format!("failed to open {}: {}", path, e),
                )
            })
    })
    .await
    .map_err(|e| {
        DriverError::new(
            device_name,
            DriverErrorKind::Connection,
            format!("port open task failed: {}", e),
        )
    })??;

    tracing::info!(port = port_path, baud_rate, device = device_name, "Opened serial port");
    Ok(opened)
}

// =============================================================================
// Line I/O
// =============================================================================

/// Discard whatever is waiting in the receive buffer.
///
/// Returns the number of bytes thrown away.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total += n,
            Ok(Err(_)) | Err(_) => break,
        }
    }

    total
}

/// Write one command followed by CR LF.
pub async fn write_line(port: &SharedPort, device: &str, command: &str) -> DriverResult<()> {
    let mut guard = port.lock().await;
    let writer = guard.get_mut();
    let framed = format!("{}\r\n", command);
    writer
        .write_all(framed.as_bytes())
        .await
        .map_err(|e| DriverError::io(device, &e))?;
    writer.flush().await.map_err(|e| DriverError::io(device, &e))
}

/// Write one command and read one CR LF terminated reply.
///
/// Stale input is drained first. An empty read (EOF) means the far end went
/// away and is reported as a connection error.
pub async fn query_line(
    port: &SharedPort,
    device: &str,
    command: &str,
    timeout: Duration,
) -> DriverResult<String> {
    let mut guard = port.lock().await;

    let discarded = drain_serial_buffer(guard.get_mut(), 5).await;
    if discarded > 0 {
        tracing::trace!(device, discarded, "Discarded stale bytes before query");
    }

    let framed = format!("{}\r\n", command);
    let writer = guard.get_mut();
    writer
        .write_all(framed.as_bytes())
        .await
        .map_err(|e| DriverError::io(device, &e))?;
    writer.flush().await.map_err(|e| DriverError::io(device, &e))?;

    let mut response = String::new();
    let read = tokio::time::timeout(timeout, guard.read_line(&mut response))
        .await
        .map_err(|_| {
            DriverError::new(
                device,
                DriverErrorKind::Timeout,
                format!("no reply to '{}' within {:?}", command, timeout),
            )
        })?
        .map_err(|e| DriverError::io(device, &e))?;

    if read == 0 {
        return Err(DriverError::new(
            device,
            DriverErrorKind::Connection,
            "port closed",
        ));
    }

    tracing::trace!(device, command, response = %response.trim(), "Serial query");
    Ok(response.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_line_round_trip() {
        let (mut host, device) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(device));

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let n = host.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"1TP?\r\n");
            host.write_all(b"45.5\r\n").await.unwrap();
            host
        });

        let reply = query_line(&port, "rotator", "1TP?", Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(reply, "45.5");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_query_line_times_out() {
        let (_host, device) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(device));

        let err = query_line(&port, "rotator", "1TP?", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_drain_serial_buffer() {
        let (mut host, mut device) = tokio::io::duplex(64);
        host.write_all(b"stale data 12345").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_serial_buffer(&mut device, 50).await;
        assert_eq!(discarded, 16);
    }
}
