use serde::{Deserialize, Serialize};

use crate::link::LinkState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub system_id: u8,
    pub component_id: u8,
    pub armed: bool,
    pub custom_mode: u32,
    pub mode: String,
    pub vehicle_type: String,
    pub autopilot: String,
    pub system_status: String,
}

/// Angles in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f32,
    pub relative_alt_m: f32,
    pub groundspeed: f32,
    pub climb: f32,
    /// Degrees, None when the vehicle reports the heading as unknown.
    pub heading: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsQuality {
    pub fix_type: u8,
    pub satellites: Option<u8>,
    pub hdop: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Battery {
    pub voltage: Option<f32>,   // Volts
    pub current: Option<f32>,   // Amps
    pub remaining: Option<u8>,  // Percent 0-100
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VfrHud {
    pub airspeed: f32,
    pub groundspeed: f32,
    pub heading: f32,
    pub throttle: f32,
    pub alt: f32,
    pub climb: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusText {
    /// MAV_SEVERITY: 0 emergency .. 7 debug.
    pub severity: u8,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamValue {
    pub name: String,
    pub value: f32,
    pub index: u16,
    pub count: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub command: String,
    pub result: String,
    pub accepted: bool,
}

/// Raw PWM values for the first eight channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RcChannels {
    pub channels: [u16; 8],
    pub rssi: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Imu {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
    pub mag: [i16; 3],
}

/// One decoded vehicle message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Telemetry {
    Heartbeat(Heartbeat),
    Attitude(Attitude),
    Position(Position),
    GpsQuality(GpsQuality),
    Battery(Battery),
    VfrHud(VfrHud),
    StatusText(StatusText),
    Param(ParamValue),
    CommandAck(CommandAck),
    RcChannels(RcChannels),
    Imu(Imu),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventKind {
    State,
    Telemetry,
    Log,
}

/// Line-oriented record used by `gcs monitor --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub ts_unix_ms: i64,
    pub kind: EventKind,
    pub state: LinkState,
    pub telemetry: Option<Telemetry>,
    pub msg: String,
}
