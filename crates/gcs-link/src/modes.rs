use mavlink::common::{MavAutopilot, MavModeFlag};

use crate::error::LinkError;

/// ArduCopter custom modes (HEARTBEAT.custom_mode / MAV_CMD_DO_SET_MODE param2).
pub const COPTER_MODES: &[(&str, u32)] = &[
    ("STABILIZE", 0),
    ("ACRO", 1),
    ("ALT_HOLD", 2),
    ("AUTO", 3),
    ("GUIDED", 4),
    ("LOITER", 5),
    ("RTL", 6),
    ("CIRCLE", 7),
    ("LAND", 9),
    ("DRIFT", 11),
    ("SPORT", 13),
    ("FLIP", 14),
    ("AUTOTUNE", 15),
    ("POSHOLD", 16),
    ("BRAKE", 17),
    ("THROW", 18),
    ("SMART_RTL", 21),
];

pub fn mode_id(name: &str) -> Result<u32, LinkError> {
    let upper = name.trim().to_ascii_uppercase();
    COPTER_MODES
        .iter()
        .find(|(n, _)| *n == upper)
        .map(|(_, id)| *id)
        .ok_or_else(|| LinkError::UnknownMode(name.to_string()))
}

pub fn mode_name(id: u32) -> Option<&'static str> {
    COPTER_MODES.iter().find(|(_, m)| *m == id).map(|(n, _)| *n)
}

/// Human-readable mode for a heartbeat.
pub fn describe(autopilot: MavAutopilot, base_mode: MavModeFlag, custom_mode: u32) -> String {
    if base_mode.contains(MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED)
        && autopilot == MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA
    {
        return match mode_name(custom_mode) {
            Some(n) => n.to_string(),
            None => format!("Mode({})", custom_mode),
        };
    }
    if base_mode.contains(MavModeFlag::MAV_MODE_FLAG_AUTO_ENABLED) {
        "AUTO".into()
    } else if base_mode.contains(MavModeFlag::MAV_MODE_FLAG_GUIDED_ENABLED) {
        "GUIDED".into()
    } else if base_mode.contains(MavModeFlag::MAV_MODE_FLAG_STABILIZE_ENABLED) {
        "STABILIZE".into()
    } else if base_mode.contains(MavModeFlag::MAV_MODE_FLAG_MANUAL_INPUT_ENABLED) {
        "MANUAL".into()
    } else {
        format!("Mode(0x{:02x})", base_mode.bits())
    }
}
