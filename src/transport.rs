//! Serial uplink to the compute node.
//!
//! The cycle driver only sees the `Transport` trait: a duplex byte stream
//! with a best-effort write and a read that returns immediately with
//! whatever bytes are pending (possibly zero). `SerialLink` realizes it
//! over a real serial device; tests substitute in-memory impls.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use thiserror::Error;
use tracing::info;

use crate::config::SafetyNodeConfig;

/// Transport open/configure error. Always startup-fatal: the node must not
/// run without a way to report its state.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
}

/// Byte-oriented duplex channel between the node and the upstream.
pub trait Transport {
    /// Write one outbound message. Mid-loop failures are non-fatal to the
    /// caller; the next cycle retransmits the current state anyway.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Single read attempt. Returns `Ok(0)` when nothing is pending.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// 8N1 serial line, no flow control, short read timeout standing in for a
/// non-blocking read.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub fn open(config: &SafetyNodeConfig) -> Result<Self, TransportError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open()
            .map_err(|source| TransportError::Open {
                port: config.port.clone(),
                source,
            })?;

        info!(port = %config.port, baud = config.baud_rate, "serial uplink open");
        Ok(Self { port })
    }
}

impl Transport for SerialLink {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // Timeout just means no bytes arrived this cycle.
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}
