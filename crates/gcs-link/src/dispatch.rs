use gcs_proto::telemetry::{
    Attitude, Battery, CommandAck, GpsQuality, Heartbeat, Imu, ParamValue, Position, RcChannels,
    StatusText, Telemetry, VfrHud,
};
use mavlink::common::{MavAutopilot, MavMessage, MavModeFlag, MavResult, MavType};
use mavlink::{MavHeader, Message};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::modes;
use crate::params::param_id_to_string;

/// Unpacks the message types the ground station cares about. Everything else
/// is None and only shows up in [`MessageStats`].
pub fn decode(hdr: &MavHeader, msg: &MavMessage) -> Option<Telemetry> {
    let t = match msg {
        MavMessage::HEARTBEAT(hb) => Telemetry::Heartbeat(Heartbeat {
            system_id: hdr.system_id,
            component_id: hdr.component_id,
            armed: hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED),
            custom_mode: hb.custom_mode,
            mode: modes::describe(hb.autopilot, hb.base_mode, hb.custom_mode),
            vehicle_type: format!("{:?}", hb.mavtype),
            autopilot: format!("{:?}", hb.autopilot),
            system_status: format!("{:?}", hb.system_status),
        }),
        MavMessage::ATTITUDE(a) => Telemetry::Attitude(Attitude {
            roll: a.roll,
            pitch: a.pitch,
            yaw: a.yaw,
        }),
        MavMessage::GLOBAL_POSITION_INT(p) => {
            let vx = p.vx as f32 / 100.0; // cm/s
            let vy = p.vy as f32 / 100.0;
            Telemetry::Position(Position {
                lat: p.lat as f64 / 1e7,
                lon: p.lon as f64 / 1e7,
                alt_m: p.alt as f32 / 1000.0, // mm
                relative_alt_m: p.relative_alt as f32 / 1000.0,
                groundspeed: (vx * vx + vy * vy).sqrt(),
                climb: -(p.vz as f32) / 100.0, // NED: positive vz is down
                heading: (p.hdg != u16::MAX).then(|| p.hdg as f32 / 100.0),
            })
        }
        MavMessage::GPS_RAW_INT(g) => Telemetry::GpsQuality(GpsQuality {
            fix_type: g.fix_type as u8,
            satellites: (g.satellites_visible != u8::MAX).then_some(g.satellites_visible),
            hdop: (g.eph != u16::MAX).then(|| g.eph as f32 / 100.0),
        }),
        MavMessage::SYS_STATUS(s) => Telemetry::Battery(Battery {
            // mV, u16::MAX = unknown
            voltage: (s.voltage_battery != u16::MAX).then(|| s.voltage_battery as f32 / 1000.0),
            // cA, -1 = unknown
            current: (s.current_battery != -1).then(|| s.current_battery as f32 / 100.0),
            remaining: (0..=100)
                .contains(&s.battery_remaining)
                .then_some(s.battery_remaining as u8),
        }),
        MavMessage::VFR_HUD(h) => Telemetry::VfrHud(VfrHud {
            airspeed: h.airspeed,
            groundspeed: h.groundspeed,
            heading: h.heading as f32,
            throttle: h.throttle as f32,
            alt: h.alt,
            climb: h.climb,
        }),
        MavMessage::STATUSTEXT(st) => Telemetry::StatusText(StatusText {
            severity: st.severity as u8,
            text: st
                .text
                .iter()
                .take_while(|&&c| c != 0)
                .map(|&c| c as char)
                .collect::<String>()
                .trim()
                .to_string(),
        }),
        MavMessage::PARAM_VALUE(p) => Telemetry::Param(ParamValue {
            name: param_id_to_string(&p.param_id),
            value: p.param_value,
            index: p.param_index,
            count: p.param_count,
        }),
        MavMessage::COMMAND_ACK(ack) => Telemetry::CommandAck(CommandAck {
            command: format!("{:?}", ack.command),
            result: format!("{:?}", ack.result),
            accepted: matches!(
                ack.result,
                MavResult::MAV_RESULT_ACCEPTED | MavResult::MAV_RESULT_IN_PROGRESS
            ),
        }),
        MavMessage::RC_CHANNELS(rc) => Telemetry::RcChannels(RcChannels {
            channels: [
                rc.chan1_raw, rc.chan2_raw, rc.chan3_raw, rc.chan4_raw,
                rc.chan5_raw, rc.chan6_raw, rc.chan7_raw, rc.chan8_raw,
            ],
            rssi: rc.rssi,
        }),
        MavMessage::RAW_IMU(imu) => Telemetry::Imu(Imu {
            accel: [imu.xacc, imu.yacc, imu.zacc],
            gyro: [imu.xgyro, imu.ygyro, imu.zgyro],
            mag: [imu.xmag, imu.ymag, imu.zmag],
        }),
        _ => return None,
    };
    Some(t)
}

/// Heartbeats from ground stations, cameras and other non-autopilot
/// components don't count as vehicle liveness.
pub fn is_autopilot_heartbeat(msg: &MavMessage) -> bool {
    matches!(
        msg,
        MavMessage::HEARTBEAT(hb)
            if hb.mavtype != MavType::MAV_TYPE_GCS && hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID
    )
}

#[derive(Debug, Clone, Copy)]
pub struct TypeStats {
    pub count: u64,
    pub last_seen: Instant,
    last_logged: Option<Instant>,
}

/// Per message type counters, staleness and a log throttle.
#[derive(Debug, Clone, Default)]
pub struct MessageStats {
    per_type: HashMap<&'static str, TypeStats>,
    total: u64,
}

impl MessageStats {
    pub fn record(&mut self, msg: &MavMessage, now: Instant) -> &'static str {
        let name = msg.message_name();
        self.record_name(name, now);
        name
    }

    pub fn record_name(&mut self, name: &'static str, now: Instant) {
        self.total += 1;
        self.per_type
            .entry(name)
            .and_modify(|s| {
                s.count += 1;
                s.last_seen = now;
            })
            .or_insert(TypeStats { count: 1, last_seen: now, last_logged: None });
    }

    pub fn get(&self, name: &str) -> Option<&TypeStats> {
        self.per_type.get(name)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Never-seen types count as stale.
    pub fn is_stale(&self, name: &str, max_age: Duration, now: Instant) -> bool {
        self.per_type
            .get(name)
            .map(|s| now.saturating_duration_since(s.last_seen) > max_age)
            .unwrap_or(true)
    }

    /// At most one true per type per interval.
    pub fn should_log(&mut self, name: &str, interval: Duration, now: Instant) -> bool {
        let Some(s) = self.per_type.get_mut(name) else { return false; };
        match s.last_logged {
            Some(t) if now.saturating_duration_since(t) < interval => false,
            _ => {
                s.last_logged = Some(now);
                true
            }
        }
    }

    /// (name, count) sorted by count, busiest first.
    pub fn summary(&self) -> Vec<(&'static str, u64)> {
        let mut v: Vec<_> = self.per_type.iter().map(|(n, s)| (*n, s.count)).collect();
        v.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        v
    }
}
