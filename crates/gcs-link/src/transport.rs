use gcs_proto::udp::{self, BoxedConnection};
use mavlink::{common::MavMessage, error::MessageReadError, MavHeader};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::LinkError;

/// Blocking MAVLink message pipe. Implementations must allow `recv` on one
/// thread while another thread calls `send`.
pub trait Transport: Send + Sync {
    fn recv(&self) -> Result<(MavHeader, MavMessage), LinkError>;
    fn send(&self, header: &MavHeader, msg: &MavMessage) -> Result<(), LinkError>;

    /// Marks the transport closed. A `recv` running on another thread
    /// returns `Closed` once its current read ends; later calls fail at once.
    /// The device itself is released when the last reference goes.
    fn close(&self) {}
}

/// Opens transports for an endpoint; called again on reconnect.
pub trait TransportFactory: Send + Sync {
    fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, LinkError>;
}

/// Upper bound on one UDP read, so a closed transport's reader gets back
/// to check its stop flag.
pub const READ_TIMEOUT: Duration = udp::DEFAULT_READ_TIMEOUT;

pub struct MavTransport {
    conn: BoxedConnection,
    closed: AtomicBool,
}

impl MavTransport {
    pub fn new(conn: BoxedConnection) -> Self {
        Self { conn, closed: AtomicBool::new(false) }
    }

    fn closed_err(&self) -> Option<LinkError> {
        self.closed.load(Ordering::Acquire).then(|| LinkError::Closed("transport closed".into()))
    }
}

impl Transport for MavTransport {
    fn recv(&self) -> Result<(MavHeader, MavMessage), LinkError> {
        if let Some(e) = self.closed_err() {
            return Err(e);
        }
        let res = self.conn.recv();
        if let Some(e) = self.closed_err() {
            return Err(e);
        }
        res.map_err(|e| match e {
            MessageReadError::Io(io) => match io.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
                    LinkError::Recv(io.to_string())
                }
                _ => LinkError::Closed(io.to_string()),
            },
            other => LinkError::Recv(other.to_string()),
        })
    }

    fn send(&self, header: &MavHeader, msg: &MavMessage) -> Result<(), LinkError> {
        if let Some(e) = self.closed_err() {
            return Err(e);
        }
        self.conn
            .send(header, msg)
            .map(|_| ())
            .map_err(|e| LinkError::Send(e.to_string()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("transport closed");
        }
    }
}

/// Real transports: UDP with a bounded read, everything else through
/// `mavlink::connect`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MavlinkFactory;

impl TransportFactory for MavlinkFactory {
    fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, LinkError> {
        let url = endpoint.mavlink_url();
        let open_err = |reason: String| LinkError::Open { endpoint: url.clone(), reason };

        if let Endpoint::Serial { dev, baud } = endpoint {
            // quick validate device; mavlink's own error for a missing port is opaque
            let port = tokio_serial::new(dev, *baud)
                .open_native_async()
                .map_err(|e| open_err(format!("serial device {}: {}", dev, e)))?;
            drop(port);
        }

        let conn = udp::connect(&url, READ_TIMEOUT).map_err(|e| open_err(e.to_string()))?;
        debug!("transport open: {}", url);
        Ok(Arc::new(MavTransport::new(conn)))
    }
}

/// Serial ports visible to the OS, with the simulator pseudo-port first.
pub fn list_ports() -> Vec<String> {
    let mut out = vec!["sim".to_string()];
    match tokio_serial::available_ports() {
        Ok(ports) => out.extend(ports.into_iter().map(|p| p.port_name)),
        Err(e) => debug!("serial port enumeration failed: {}", e),
    }
    out
}
