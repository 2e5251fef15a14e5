//! MAVLink messages the ground station sends.

use mavlink::common::{
    MavAutopilot, MavCmd, MavDataStream, MavMessage, MavModeFlag, MavParamType, MavState, MavType,
    COMMAND_LONG_DATA, HEARTBEAT_DATA, PARAM_REQUEST_LIST_DATA, PARAM_REQUEST_READ_DATA,
    PARAM_SET_DATA, REQUEST_DATA_STREAM_DATA,
};

use crate::params::param_id_from_str;

/// Vehicle ids learned from its heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub system: u8,
    pub component: u8,
}

impl Default for Target {
    // ArduPilot's usual ids until a heartbeat says otherwise
    fn default() -> Self {
        Self { system: 1, component: 1 }
    }
}

pub fn command_long(target: Target, command: MavCmd, params: [f32; 7]) -> MavMessage {
    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        target_system: target.system,
        target_component: target.component,
        command,
        confirmation: 0,
        param1: params[0],
        param2: params[1],
        param3: params[2],
        param4: params[3],
        param5: params[4],
        param6: params[5],
        param7: params[6],
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

pub fn request_data_streams(target: Target, rate_hz: u16) -> MavMessage {
    MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
        req_message_rate: rate_hz,
        target_system: target.system,
        target_component: target.component,
        req_stream_id: MavDataStream::MAV_DATA_STREAM_ALL as u8,
        start_stop: 1,
    })
}

pub fn arm_disarm(target: Target, arm: bool) -> MavMessage {
    let p1 = if arm { 1.0 } else { 0.0 };
    command_long(target, MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [p1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
}

pub fn set_mode(target: Target, custom_mode: u32) -> MavMessage {
    let flag = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
    command_long(
        target,
        MavCmd::MAV_CMD_DO_SET_MODE,
        [flag, custom_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
    )
}

/// `motor` is 1-based; throttle is percent; duration in seconds.
pub fn motor_test(target: Target, motor: u8, throttle_pct: f32, duration_s: f32) -> MavMessage {
    // param2 0 = MOTOR_TEST_THROTTLE_PERCENT, param5 = motor count (one)
    command_long(
        target,
        MavCmd::MAV_CMD_DO_MOTOR_TEST,
        [motor as f32, 0.0, throttle_pct, duration_s, 1.0, 0.0, 0.0],
    )
}

pub fn preflight_calibration(target: Target, params: [f32; 7]) -> MavMessage {
    command_long(target, MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION, params)
}

pub fn param_request_list(target: Target) -> MavMessage {
    MavMessage::PARAM_REQUEST_LIST(PARAM_REQUEST_LIST_DATA {
        target_system: target.system,
        target_component: target.component,
    })
}

pub fn param_request_read_index(target: Target, index: u16) -> MavMessage {
    MavMessage::PARAM_REQUEST_READ(PARAM_REQUEST_READ_DATA {
        param_index: index as i16,
        target_system: target.system,
        target_component: target.component,
        param_id: [0; 16],
    })
}

pub fn param_request_read_name(target: Target, name: &str) -> MavMessage {
    MavMessage::PARAM_REQUEST_READ(PARAM_REQUEST_READ_DATA {
        param_index: -1,
        target_system: target.system,
        target_component: target.component,
        param_id: param_id_from_str(name),
    })
}

pub fn param_set(target: Target, name: &str, value: f32) -> MavMessage {
    MavMessage::PARAM_SET(PARAM_SET_DATA {
        param_value: value,
        target_system: target.system,
        target_component: target.component,
        param_id: param_id_from_str(name),
        param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
    })
}
