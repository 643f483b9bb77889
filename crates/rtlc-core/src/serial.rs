//! Serial link helpers for the host side.
//!
//! # Types
//!
//! - [`SerialPortIO`]: trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: type-erased boxed serial port
//! - [`PortInfo`]: one endpoint reported by port discovery
//!
//! # Utilities
//!
//! - [`open_serial_async`]: open a port with the deployment's link parameters
//! - [`available_ports`]: enumerate connection endpoints
//! - [`drain_serial_buffer`]: drop stale bytes before sending a request

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::config::LinkConfig;
use crate::error::{ScanError, ScanResult};

pub use tokio_serial::SerialStream;

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can carry the
/// protocol:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
/// - `tokio::net::UnixStream` (in-process simulated controller)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// A connection endpoint the operator can choose from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// System path or name, e.g. `/dev/ttyACM0` or `COM3`.
    pub name: String,
    /// Human-readable description of the port type.
    pub description: String,
}

/// Enumerate available serial endpoints.
///
/// The session treats the chosen name as an opaque handle.
pub fn available_ports() -> ScanResult<Vec<PortInfo>> {
    let ports = serialport::available_ports()
        .map_err(|e| ScanError::Connection {
            port: "*".to_string(),
            message: e.to_string(),
        })?
        .into_iter()
        .map(|port| PortInfo {
            description: describe(&port.port_type),
            name: port.port_name,
        })
        .collect();
    Ok(ports)
}

fn describe(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(usb) => match (&usb.manufacturer, &usb.product) {
            (Some(manufacturer), Some(product)) => format!("USB {manufacturer} {product}"),
            (_, Some(product)) => format!("USB {product}"),
            _ => format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
        },
        serialport::SerialPortType::PciPort => "PCI".to_string(),
        serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        serialport::SerialPortType::Unknown => "Unknown".to_string(),
    }
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Applies the link's bit rate and read timeout with 8N1 framing and no flow control.
/// Failure is reported as [`ScanError::Connection`], which callers must not retry.
pub async fn open_serial_async(
    port_path: &str,
    link: &LinkConfig,
) -> ScanResult<SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let baud_rate = link.baud_rate;
    let timeout = link.read_timeout();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| ScanError::Connection {
                port: port_path_owned.clone(),
                message: e.to_string(),
            })
    })
    .await
    .map_err(|e| ScanError::Connection {
        port: port_path.to_string(),
        message: format!("spawn_blocking for serial port opening failed: {e}"),
    })?
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards until nothing arrives within `timeout_ms`. Returns the number
/// of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break, // no more immediate data
        }
    }

    total_discarded
}
