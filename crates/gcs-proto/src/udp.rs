//! MAVLink over UDP with a bounded read.
//!
//! `recv` fails with a `WouldBlock`/`TimedOut` I/O error once the read
//! timeout passes without a datagram, so the thread calling it can look at
//! its stop flag and let go of the socket. Other address kinds go through
//! `mavlink::connect` unchanged.

use mavlink::common::MavMessage;
use mavlink::error::{MessageReadError, MessageWriteError};
use mavlink::{read_versioned_msg, write_versioned_msg, MavConnection, MavHeader, MavlinkVersion, Message};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

pub type BoxedConnection = Box<dyn MavConnection<MavMessage> + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct RecvBuf {
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

pub struct UdpLink {
    socket: UdpSocket,
    rx: Mutex<RecvBuf>,
    /// Fixed for `udpout`; for `udpin` the sender of the last datagram.
    dest: Mutex<Option<SocketAddr>>,
    server: bool,
    version: MavlinkVersion,
}

fn resolve(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("no address for {}", addr)))
}

impl UdpLink {
    /// `udpin:<host>:<port>` listens, `udpout:<host>:<port>` sends from an
    /// ephemeral port.
    pub fn open(url: &str, read_timeout: Duration) -> io::Result<Self> {
        let (socket, server, dest) = if let Some(addr) = url.strip_prefix("udpin:") {
            (UdpSocket::bind(resolve(addr)?)?, true, None)
        } else if let Some(addr) = url.strip_prefix("udpout:") {
            let dest = resolve(addr)?;
            (UdpSocket::bind("0.0.0.0:0")?, false, Some(dest))
        } else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("not a udp address: {}", url)));
        };
        socket.set_read_timeout(Some(read_timeout.max(Duration::from_millis(1))))?;
        Ok(Self {
            socket,
            rx: Mutex::new(RecvBuf { buf: vec![0; 65_536], start: 0, end: 0 }),
            dest: Mutex::new(dest),
            server,
            version: MavlinkVersion::V2,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl<M: Message> MavConnection<M> for UdpLink {
    fn recv(&self) -> Result<(MavHeader, M), MessageReadError> {
        let mut guard = lock(&self.rx);
        let rx = &mut *guard;
        loop {
            if rx.start >= rx.end {
                let (len, src) = self.socket.recv_from(&mut rx.buf)?;
                rx.start = 0;
                rx.end = len;
                if self.server {
                    *lock(&self.dest) = Some(src);
                }
            }
            let mut pending = &rx.buf[rx.start..rx.end];
            let before = pending.len();
            let res = read_versioned_msg(&mut pending, self.version);
            let used = before - pending.len();
            // a bad frame still moves past at least one byte
            rx.start += used.max(1);
            if let Ok(frame) = res {
                return Ok(frame);
            }
        }
    }

    fn send(&self, header: &MavHeader, data: &M) -> Result<usize, MessageWriteError> {
        let Some(dest) = *lock(&self.dest) else {
            // udpin before the first datagram: nobody to talk to yet
            return Ok(0);
        };
        let mut buf = Vec::with_capacity(280);
        write_versioned_msg(&mut buf, self.version, *header, data)?;
        Ok(self.socket.send_to(&buf, dest)?)
    }

    fn set_protocol_version(&mut self, version: MavlinkVersion) {
        self.version = version;
    }

    fn get_protocol_version(&self) -> MavlinkVersion {
        self.version
    }
}

/// Like `mavlink::connect`, with UDP addresses opened as [`UdpLink`].
pub fn connect(url: &str, read_timeout: Duration) -> io::Result<BoxedConnection> {
    if url.starts_with("udpin:") || url.starts_with("udpout:") {
        Ok(Box::new(UdpLink::open(url, read_timeout)?))
    } else {
        mavlink::connect::<MavMessage>(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{MavAutopilot, MavModeFlag, MavState, MavType, HEARTBEAT_DATA};
    use std::time::Instant;

    fn heartbeat() -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 5,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        })
    }

    #[test]
    fn silent_socket_returns_after_timeout() {
        let link = UdpLink::open("udpin:127.0.0.1:0", Duration::from_millis(50)).unwrap();
        let started = Instant::now();
        let res: Result<(MavHeader, MavMessage), _> = link.recv();
        match res {
            Err(MessageReadError::Io(e)) => {
                assert!(matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut))
            }
            other => panic!("unexpected {:?}", other.map(|(h, _)| h)),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn frames_travel_and_listener_learns_peer() {
        let server = UdpLink::open("udpin:127.0.0.1:0", Duration::from_millis(500)).unwrap();
        let port = server.local_addr().unwrap().port();
        let client = UdpLink::open(&format!("udpout:127.0.0.1:{}", port), Duration::from_millis(500)).unwrap();

        let hdr = MavHeader { system_id: 7, component_id: 1, sequence: 3 };
        // a listener that has heard nobody drops sends
        assert_eq!(MavConnection::<MavMessage>::send(&server, &hdr, &heartbeat()).unwrap(), 0);

        MavConnection::<MavMessage>::send(&client, &hdr, &heartbeat()).unwrap();
        let (got, msg): (MavHeader, MavMessage) = server.recv().unwrap();
        assert_eq!((got.system_id, got.sequence), (7, 3));
        assert!(matches!(msg, MavMessage::HEARTBEAT(h) if h.custom_mode == 5));

        let back = MavHeader { system_id: 255, component_id: 190, sequence: 0 };
        assert!(MavConnection::<MavMessage>::send(&server, &back, &heartbeat()).unwrap() > 0);
        let (got, _): (MavHeader, MavMessage) = client.recv().unwrap();
        assert_eq!(got.system_id, 255);
    }

    #[test]
    fn dropping_the_link_frees_the_port() {
        let link = UdpLink::open("udpin:127.0.0.1:0", Duration::from_millis(50)).unwrap();
        let addr = link.local_addr().unwrap();
        drop(link);
        assert!(UdpSocket::bind(addr).is_ok());
    }
}
