use gcs_model::logbook::LogBook;
use gcs_model::params::ParamTable;
use gcs_model::sensors::SensorTable;
use gcs_model::snapshot::TelemetrySnapshot;
use gcs_proto::link::LinkState;
use std::time::{Duration, Instant};

use crate::calibration::CalibrationProgress;

#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub state: LinkState,
    pub endpoint: Option<String>,
    pub target_system: Option<u8>,
    pub target_component: Option<u8>,
    pub last_heartbeat: Option<Instant>,
    pub last_msg: Option<String>,
    pub received: u64,
    pub dropped: u64,
    pub reconnects: u32,
    /// Watched message types not seen recently on a connected link.
    pub stale: Vec<String>,
    /// (message type, count), busiest first.
    pub message_counts: Vec<(String, u64)>,
}

impl LinkStatus {
    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }

    pub fn connected(&self) -> bool {
        self.state.is_connected()
    }
}

/// Everything a front end reads about the vehicle. Shared behind a mutex;
/// only the session task writes.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub status: LinkStatus,
    pub snapshot: TelemetrySnapshot,
    pub sensors: SensorTable,
    pub params: ParamTable,
    pub log: LogBook,
    pub calibration: Option<CalibrationProgress>,
    pub motor_test_active: bool,
}

impl Vehicle {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            status: LinkStatus::default(),
            snapshot: TelemetrySnapshot::default(),
            sensors: SensorTable::new_default(),
            params: ParamTable::default(),
            log: LogBook::new(log_capacity),
            calibration: None,
            motor_test_active: false,
        }
    }
}

impl Default for Vehicle {
    fn default() -> Self {
        Self::new(500)
    }
}
