#![allow(dead_code)]

use gcs_link::endpoint::Endpoint;
use gcs_link::transport::{Transport, TransportFactory};
use gcs_link::LinkError;
use mavlink::common::{
    MavAutopilot, MavModeFlag, MavParamType, MavState, MavType, MavMessage, ATTITUDE_DATA,
    HEARTBEAT_DATA, PARAM_VALUE_DATA,
};
use mavlink::{MavHeader, Message};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Frame = (MavHeader, MavMessage);

/// In-memory transport. The test holds the `Sender` and plays the vehicle;
/// dropping it closes the transport.
pub struct FakeTransport {
    rx: Mutex<Receiver<Frame>>,
    pub sent: Mutex<Vec<MavMessage>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, Sender<Frame>) {
        let (tx, rx) = mpsc::channel();
        let t = Self {
            rx: Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        };
        (Arc::new(t), tx)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every later `send` fails like a yanked cable would.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Names of every message sent so far, in order.
    pub fn sent_names(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|m| m.message_name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.sent_names().iter().filter(|n| **n == name).count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for FakeTransport {
    fn recv(&self) -> Result<Frame, LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed("closed".into()));
        }
        match self.rx.lock().unwrap().recv_timeout(Duration::from_millis(20)) {
            Ok(f) => Ok(f),
            Err(RecvTimeoutError::Timeout) => Err(LinkError::Recv("timeout".into())),
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Closed("peer gone".into())),
        }
    }

    fn send(&self, _header: &MavHeader, msg: &MavMessage) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed("closed".into()));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(LinkError::Send("cable".into()));
        }
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out queued transports, one per `open`; an empty queue fails the open.
#[derive(Default)]
pub struct FakeFactory {
    queue: Mutex<VecDeque<Arc<FakeTransport>>>,
    pub opens: AtomicUsize,
}

impl FakeFactory {
    pub fn with(transports: Vec<Arc<FakeTransport>>) -> Arc<Self> {
        Arc::new(Self { queue: Mutex::new(transports.into()), opens: AtomicUsize::new(0) })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl TransportFactory for FakeFactory {
    fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, LinkError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().unwrap().pop_front() {
            Some(t) => Ok(t),
            None => Err(LinkError::Open { endpoint: endpoint.to_string(), reason: "no device".into() }),
        }
    }
}

pub fn hdr(system_id: u8) -> MavHeader {
    MavHeader { system_id, component_id: 1, sequence: 0 }
}

pub fn heartbeat(armed: bool, custom_mode: u32) -> MavMessage {
    let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
    if armed {
        base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
    }
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode,
        mavtype: MavType::MAV_TYPE_QUADROTOR,
        autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
        base_mode,
        system_status: MavState::MAV_STATE_STANDBY,
        mavlink_version: 3,
    })
}

pub fn gcs_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

pub fn attitude(roll: f32) -> MavMessage {
    MavMessage::ATTITUDE(ATTITUDE_DATA { roll, ..Default::default() })
}

pub fn param_value(name: &str, value: f32, index: u16, count: u16) -> MavMessage {
    let mut param_id = [0u8; 16];
    param_id[..name.len()].copy_from_slice(name.as_bytes());
    MavMessage::PARAM_VALUE(PARAM_VALUE_DATA {
        param_value: value,
        param_count: count,
        param_index: index,
        param_id,
        param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
    })
}
