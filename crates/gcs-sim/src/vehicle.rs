//! Simulated ArduCopter: state plus the MAVLink it emits and answers.

use mavlink::common::{
    GpsFixType, MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavParamType, MavResult,
    MavSeverity, MavState, MavType, ATTITUDE_DATA, COMMAND_ACK_DATA, COMMAND_LONG_DATA,
    GLOBAL_POSITION_INT_DATA, GPS_RAW_INT_DATA, HEARTBEAT_DATA, PARAM_VALUE_DATA,
    STATUSTEXT_DATA, SYS_STATUS_DATA, VFR_HUD_DATA,
};
use rand::Rng;
use std::f32::consts::PI;

use crate::SimConfig;

const DEFAULT_PARAMS: &[(&str, f32)] = &[
    ("ANGLE_MAX", 3000.0),
    ("ARMING_CHECK", 1.0),
    ("BATT_CAPACITY", 5200.0),
    ("COMPASS_USE", 1.0),
    ("FLTMODE1", 0.0),
    ("FLTMODE6", 6.0),
    ("FRAME_CLASS", 1.0),
    ("FRAME_TYPE", 1.0),
    ("FS_THR_ENABLE", 1.0),
    ("INS_ACCEL_FILTER", 20.0),
    ("LOIT_SPEED", 1250.0),
    ("MOT_SPIN_ARM", 0.1),
    ("MOT_SPIN_MIN", 0.15),
    ("PILOT_SPEED_UP", 250.0),
    ("RTL_ALT", 1500.0),
    ("SYSID_THISMAV", 1.0),
    ("WPNAV_SPEED", 500.0),
];

fn text_bytes<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    for (d, b) in out.iter_mut().zip(s.bytes()) {
        *d = b;
    }
    out
}

fn id_to_string(id: &[u8; 16]) -> String {
    id.iter().take_while(|&&c| c != 0).map(|&c| c as char).collect()
}

pub struct SimVehicle {
    cfg: SimConfig,
    pub armed: bool,
    pub custom_mode: u32,
    params: Vec<(String, f32)>,
    /// Simulated seconds since boot.
    t: f32,
    ticks: u64,
    list_requests: u32,
}

impl SimVehicle {
    pub fn new(cfg: SimConfig) -> Self {
        Self {
            cfg,
            armed: false,
            custom_mode: 0,
            params: DEFAULT_PARAMS.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
            t: 0.0,
            ticks: 0,
            list_requests: 0,
        }
    }

    pub fn param(&self, name: &str) -> Option<f32> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    fn heartbeat(&self) -> MavMessage {
        let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
            | MavModeFlag::MAV_MODE_FLAG_STABILIZE_ENABLED;
        if self.armed {
            base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
        }
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: self.custom_mode,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode,
            system_status: if self.armed { MavState::MAV_STATE_ACTIVE } else { MavState::MAV_STATE_STANDBY },
            mavlink_version: 3,
        })
    }

    /// One telemetry frame; `dt` is the time since the previous one.
    pub fn telemetry(&mut self, dt: f32) -> Vec<MavMessage> {
        self.t += dt;
        self.ticks += 1;
        let mut rng = rand::thread_rng();
        let t = self.t;
        let boot_ms = (t * 1000.0) as u32;
        let per_sec = self.cfg.rate_hz.max(1) as u64;

        // slow circle around home, ~20 m radius
        let phase = t * 2.0 * PI / 60.0;
        let lat = self.cfg.home_lat + 0.00018 * phase.cos() as f64 + rng.gen_range(-2e-7f64..2e-7);
        let lon = self.cfg.home_lon + 0.00028 * phase.sin() as f64 + rng.gen_range(-2e-7f64..2e-7);
        let alt_rel = if self.armed { 10.0 + (t * 0.5).sin() } else { 0.0 };
        let speed = if self.armed { 2.1 } else { 0.0 };
        let heading = ((phase.to_degrees() + 90.0) % 360.0 + 360.0) % 360.0;

        let mut out = Vec::with_capacity(6);
        if self.ticks % per_sec == 1 || per_sec == 1 {
            out.push(self.heartbeat());
            out.push(MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
                time_usec: (t as f64 * 1e6) as u64,
                lat: (lat * 1e7) as i32,
                lon: (lon * 1e7) as i32,
                alt: ((self.cfg.home_alt_m + alt_rel) * 1000.0) as i32,
                eph: 80,
                epv: 120,
                vel: (speed * 100.0) as u16,
                cog: (heading * 100.0) as u16,
                fix_type: GpsFixType::GPS_FIX_TYPE_3D_FIX,
                satellites_visible: 14,
                ..Default::default()
            }));
            let drain = (t / 60.0).min(70.0) as i8;
            out.push(MavMessage::SYS_STATUS(SYS_STATUS_DATA {
                voltage_battery: 11_500,
                current_battery: if self.armed { 1_050 } else { 80 },
                battery_remaining: 75 - drain,
                load: 250,
                ..Default::default()
            }));
        }
        out.push(MavMessage::ATTITUDE(ATTITUDE_DATA {
            time_boot_ms: boot_ms,
            roll: 0.05 * (t * 1.3).sin() + rng.gen_range(-0.005f32..0.005),
            pitch: 0.04 * (t * 0.9).cos() + rng.gen_range(-0.005f32..0.005),
            yaw: heading.to_radians() - PI,
            rollspeed: 0.0,
            pitchspeed: 0.0,
            yawspeed: 0.0,
        }));
        out.push(MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
            time_boot_ms: boot_ms,
            lat: (lat * 1e7) as i32,
            lon: (lon * 1e7) as i32,
            alt: ((self.cfg.home_alt_m + alt_rel) * 1000.0) as i32,
            relative_alt: (alt_rel * 1000.0) as i32,
            vx: (speed * 100.0 * heading.to_radians().cos()) as i16,
            vy: (speed * 100.0 * heading.to_radians().sin()) as i16,
            vz: 0,
            hdg: (heading * 100.0) as u16,
        }));
        out.push(MavMessage::VFR_HUD(VFR_HUD_DATA {
            airspeed: speed,
            groundspeed: speed,
            alt: self.cfg.home_alt_m + alt_rel,
            climb: 0.0,
            heading: heading as i16,
            throttle: if self.armed { 45 } else { 0 },
        }));
        out
    }

    /// Replies to a message from the ground station.
    pub fn handle(&mut self, msg: &MavMessage) -> Vec<MavMessage> {
        let sys = self.cfg.system_id;
        match msg {
            MavMessage::PARAM_REQUEST_LIST(r) if r.target_system == sys || r.target_system == 0 => {
                self.list_requests += 1;
                let drop_every = if self.list_requests == 1 { self.cfg.param_drop_every } else { None };
                (0..self.params.len())
                    .filter(|i| drop_every.map(|n| n == 0 || (i + 1) % n as usize != 0).unwrap_or(true))
                    .map(|i| self.param_value(i))
                    .collect()
            }
            MavMessage::PARAM_REQUEST_READ(r) if r.target_system == sys || r.target_system == 0 => {
                let idx = if r.param_index >= 0 {
                    Some(r.param_index as usize).filter(|i| *i < self.params.len())
                } else {
                    let name = id_to_string(&r.param_id);
                    self.params.iter().position(|(n, _)| *n == name)
                };
                idx.map(|i| vec![self.param_value(i)]).unwrap_or_default()
            }
            MavMessage::PARAM_SET(p) if p.target_system == sys || p.target_system == 0 => {
                let name = id_to_string(&p.param_id);
                match self.params.iter().position(|(n, _)| *n == name) {
                    Some(i) => {
                        self.params[i].1 = p.param_value;
                        vec![self.param_value(i)]
                    }
                    // ArduPilot stays silent on unknown names
                    None => Vec::new(),
                }
            }
            MavMessage::COMMAND_LONG(c) if c.target_system == sys || c.target_system == 0 => self.command(c),
            _ => Vec::new(),
        }
    }

    fn command(&mut self, c: &COMMAND_LONG_DATA) -> Vec<MavMessage> {
        let mut out = Vec::new();
        let result = match c.command {
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM => {
                let arm = c.param1 >= 0.5;
                if arm != self.armed {
                    self.armed = arm;
                    let text = if arm { "Arming motors" } else { "Disarming motors" };
                    out.push(self.status_text(MavSeverity::MAV_SEVERITY_INFO, text));
                }
                MavResult::MAV_RESULT_ACCEPTED
            }
            MavCmd::MAV_CMD_DO_SET_MODE => {
                let mode = c.param2 as u32;
                if mode <= 27 {
                    self.custom_mode = mode;
                    MavResult::MAV_RESULT_ACCEPTED
                } else {
                    MavResult::MAV_RESULT_DENIED
                }
            }
            MavCmd::MAV_CMD_DO_MOTOR_TEST | MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION if self.armed => {
                out.push(self.status_text(MavSeverity::MAV_SEVERITY_WARNING, "PreArm: vehicle is armed"));
                MavResult::MAV_RESULT_DENIED
            }
            MavCmd::MAV_CMD_DO_MOTOR_TEST => MavResult::MAV_RESULT_ACCEPTED,
            MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION => MavResult::MAV_RESULT_ACCEPTED,
            _ => MavResult::MAV_RESULT_UNSUPPORTED,
        };
        out.push(MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
            command: c.command,
            result,
            ..Default::default()
        }));
        out
    }

    fn param_value(&self, i: usize) -> MavMessage {
        let (name, value) = &self.params[i];
        MavMessage::PARAM_VALUE(PARAM_VALUE_DATA {
            param_value: *value,
            param_count: self.params.len() as u16,
            param_index: i as u16,
            param_id: text_bytes::<16>(name),
            param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
        })
    }

    fn status_text(&self, severity: MavSeverity, text: &str) -> MavMessage {
        MavMessage::STATUSTEXT(STATUSTEXT_DATA {
            severity,
            text: text_bytes::<50>(text),
            ..Default::default()
        })
    }
}
