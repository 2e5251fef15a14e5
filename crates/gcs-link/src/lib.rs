pub mod autodetect;
pub mod calibration;
pub mod commands;
pub mod connector;
pub mod dispatch;
pub mod doctor;
pub mod endpoint;
pub mod error;
pub mod modes;
pub mod params;
pub mod safety;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod transport;

pub use connector::{connect, LinkEvent, LinkHandle};
pub use endpoint::Endpoint;
pub use error::LinkError;

use serde::Deserialize;
use std::time::Duration;

use crate::motor_test::MotorLimits;
use crate::session::SessionSettings;
use crate::supervisor::ReconnectPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// `serial:/dev/ttyACM0:115200`, `udpin:0.0.0.0:14550`, `tcpout:host:5760`
    /// or `sim`.
    pub endpoint: Option<String>,

    /// Probe candidate serial ports/bauds and use the first that yields a
    /// HEARTBEAT. Ignored when `endpoint` is set.
    pub autodetect: bool,
    pub candidate_devs: Option<Vec<String>>,
    pub candidate_bauds: Option<Vec<u32>>,
    /// Heartbeat wait per probe.
    pub probe_timeout_ms: Option<u64>,

    /// MAVLink ids we send as. 255/190 is the customary GCS pair.
    pub sys_id: Option<u8>,
    pub comp_id: Option<u8>,

    /// REQUEST_DATA_STREAM rate.
    pub stream_rate_hz: Option<u16>,
    pub poll_interval_ms: Option<u64>,
    pub max_messages_per_cycle: Option<usize>,
    /// Reader → session queue; full queue drops messages.
    pub queue_capacity: Option<usize>,

    /// GCS heartbeat rate, 0 disables. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,
    /// Require a vehicle heartbeat before sending commands.
    pub require_heartbeat: Option<bool>,
    pub command_min_interval_ms: Option<u64>,
    /// Age after which a message type counts as stale.
    pub stale_after_ms: Option<u64>,

    pub log_capacity: Option<usize>,

    pub reconnect: ReconnectConfig,
    pub params: ParamsConfig,
    pub motors: MotorsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub heartbeat_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParamsConfig {
    pub fetch_on_connect: bool,
    pub idle_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    /// TOML file with default/unit/options/desc per parameter.
    pub metadata_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MotorsConfig {
    pub count: Option<u8>,
    pub max_throttle_pct: Option<f32>,
    pub test_duration_s: Option<f32>,
    pub sequence_step_ms: Option<u64>,
}

/// Connector knobs that live outside the session.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub poll_interval: Duration,
    pub max_messages_per_cycle: usize,
    pub queue_capacity: usize,
}

impl LinkConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let d = ReconnectPolicy::default();
        let r = &self.reconnect;
        ReconnectPolicy {
            heartbeat_timeout: r.heartbeat_timeout_ms.map(Duration::from_millis).unwrap_or(d.heartbeat_timeout),
            connect_timeout: r.connect_timeout_ms.map(Duration::from_millis).unwrap_or(d.connect_timeout),
            max_attempts: r.max_attempts.unwrap_or(d.max_attempts),
            retry_interval: r.retry_interval_ms.map(Duration::from_millis).unwrap_or(d.retry_interval),
        }
    }

    pub fn motor_limits(&self) -> MotorLimits {
        let d = MotorLimits::default();
        let m = &self.motors;
        MotorLimits {
            count: m.count.unwrap_or(d.count),
            max_throttle_pct: m.max_throttle_pct.unwrap_or(d.max_throttle_pct),
            duration: m
                .test_duration_s
                .and_then(|s| Duration::try_from_secs_f32(s).ok())
                .unwrap_or(d.duration),
            sequence_step: m.sequence_step_ms.map(Duration::from_millis).unwrap_or(d.sequence_step),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        let hz = self.send_heartbeat_hz.unwrap_or(1.0);
        SessionSettings {
            sys_id: self.sys_id.unwrap_or(255),
            comp_id: self.comp_id.unwrap_or(190),
            stream_rate_hz: self.stream_rate_hz.unwrap_or(10),
            heartbeat_interval: if hz > 0.0 { Duration::try_from_secs_f32(1.0 / hz).ok() } else { None },
            require_heartbeat: self.require_heartbeat.unwrap_or(true),
            command_min_interval: Duration::from_millis(self.command_min_interval_ms.unwrap_or(1000)),
            stale_after: Duration::from_millis(self.stale_after_ms.unwrap_or(3000)),
            log_throttle: Duration::from_secs(5),
            reconnect: self.reconnect_policy(),
            param_idle_timeout: Duration::from_millis(self.params.idle_timeout_ms.unwrap_or(2000)),
            param_max_retries: self.params.max_retries.unwrap_or(3),
            fetch_params_on_connect: self.params.fetch_on_connect,
            motors: self.motor_limits(),
            log_capacity: self.log_capacity.unwrap_or(500),
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.unwrap_or(100)),
            max_messages_per_cycle: self.max_messages_per_cycle.unwrap_or(50),
            queue_capacity: self.queue_capacity.unwrap_or(256),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.unwrap_or(1500))
    }

    pub fn candidate_devs(&self) -> Vec<String> {
        self.candidate_devs.clone().unwrap_or_else(autodetect::default_candidate_devs)
    }

    pub fn candidate_bauds(&self) -> Vec<u32> {
        self.candidate_bauds.clone().unwrap_or_else(autodetect::default_candidate_bauds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: LinkConfig = toml::from_str("").unwrap();
        let s = cfg.session_settings();
        assert_eq!(s.sys_id, 255);
        assert_eq!(s.stream_rate_hz, 10);
        assert_eq!(s.heartbeat_interval, Some(Duration::from_secs(1)));
        assert_eq!(s.reconnect, ReconnectPolicy::default());
        assert_eq!(s.param_max_retries, 3);
        let r = cfg.runtime_settings();
        assert_eq!(r.poll_interval, Duration::from_millis(100));
        assert_eq!(r.queue_capacity, 256);
        assert_eq!(cfg.candidate_bauds(), autodetect::default_candidate_bauds());
    }

    #[test]
    fn nested_sections_override() {
        let cfg: LinkConfig = toml::from_str(
            r#"
            endpoint = "udpin:0.0.0.0:14550"
            send_heartbeat_hz = 0.0
            [reconnect]
            max_attempts = 5
            heartbeat_timeout_ms = 3000
            [motors]
            max_throttle_pct = 20.0
            count = 6
            "#,
        )
        .unwrap();
        let s = cfg.session_settings();
        assert_eq!(s.heartbeat_interval, None);
        assert_eq!(s.reconnect.max_attempts, 5);
        assert_eq!(s.reconnect.heartbeat_timeout, Duration::from_secs(3));
        assert_eq!(s.motors.count, 6);
        assert_eq!(s.motors.max_throttle_pct, 20.0);
        assert_eq!(cfg.endpoint.as_deref(), Some("udpin:0.0.0.0:14550"));
    }
}
