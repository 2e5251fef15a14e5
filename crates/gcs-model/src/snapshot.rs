use gcs_proto::telemetry::{
    Attitude, Battery, GpsQuality, Heartbeat, Imu, Position, RcChannels, Telemetry, VfrHud,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Heartbeat,
    Attitude,
    Position,
    Gps,
    Battery,
    VfrHud,
    RcChannels,
    Imu,
}

/// Last-known value per telemetry channel. Latest write wins, no history.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub heartbeat: Option<Heartbeat>,
    pub attitude: Option<Attitude>,
    pub position: Option<Position>,
    pub gps: Option<GpsQuality>,
    pub battery: Option<Battery>,
    pub vfr_hud: Option<VfrHud>,
    pub rc: Option<RcChannels>,
    pub imu: Option<Imu>,
    updated: HashMap<Channel, Instant>,
}

impl TelemetrySnapshot {
    /// Stores the message if it belongs to a channel; returns that channel.
    pub fn apply(&mut self, t: &Telemetry, now: Instant) -> Option<Channel> {
        let ch = match t {
            Telemetry::Heartbeat(h) => {
                self.heartbeat = Some(h.clone());
                Channel::Heartbeat
            }
            Telemetry::Attitude(a) => {
                self.attitude = Some(*a);
                Channel::Attitude
            }
            Telemetry::Position(p) => {
                self.position = Some(*p);
                Channel::Position
            }
            Telemetry::GpsQuality(g) => {
                self.gps = Some(*g);
                Channel::Gps
            }
            Telemetry::Battery(b) => {
                self.battery = Some(*b);
                Channel::Battery
            }
            Telemetry::VfrHud(h) => {
                self.vfr_hud = Some(*h);
                Channel::VfrHud
            }
            Telemetry::RcChannels(rc) => {
                self.rc = Some(*rc);
                Channel::RcChannels
            }
            Telemetry::Imu(i) => {
                self.imu = Some(*i);
                Channel::Imu
            }
            Telemetry::StatusText(_) | Telemetry::Param(_) | Telemetry::CommandAck(_) => return None,
        };
        self.updated.insert(ch, now);
        Some(ch)
    }

    pub fn age(&self, ch: Channel, now: Instant) -> Option<Duration> {
        self.updated.get(&ch).map(|t| now.saturating_duration_since(*t))
    }

    pub fn is_armed(&self) -> Option<bool> {
        self.heartbeat.as_ref().map(|h| h.armed)
    }

    pub fn mode(&self) -> Option<&str> {
        self.heartbeat.as_ref().map(|h| h.mode.as_str())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcs_proto::telemetry::StatusText;

    #[test]
    fn latest_write_wins_and_age_tracks() {
        let mut s = TelemetrySnapshot::default();
        let t0 = Instant::now();
        let a = |roll| Telemetry::Attitude(Attitude { roll, pitch: 0.0, yaw: 0.0 });

        assert_eq!(s.apply(&a(0.1), t0), Some(Channel::Attitude));
        s.apply(&a(0.2), t0 + Duration::from_millis(100));
        assert_eq!(s.attitude.unwrap().roll, 0.2);
        assert_eq!(
            s.age(Channel::Attitude, t0 + Duration::from_millis(600)),
            Some(Duration::from_millis(500))
        );
        assert_eq!(s.age(Channel::Battery, t0), None);
    }

    #[test]
    fn non_channel_messages_are_not_stored() {
        let mut s = TelemetrySnapshot::default();
        let st = Telemetry::StatusText(StatusText { severity: 6, text: "hi".into() });
        assert_eq!(s.apply(&st, Instant::now()), None);
        assert!(s.is_armed().is_none());
    }
}
