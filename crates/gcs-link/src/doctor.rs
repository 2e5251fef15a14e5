use anyhow::Result;
use std::path::Path;

use crate::endpoint::Endpoint;
use crate::LinkConfig;

pub fn check_endpoint(cfg: &LinkConfig) -> Result<()> {
    match cfg.endpoint.as_deref() {
        Some(ep) => {
            let parsed: Endpoint = ep.parse()?;
            if let Endpoint::Serial { dev, .. } = &parsed {
                anyhow::ensure!(Path::new(dev).exists(), "link.endpoint serial device not found: {}", dev);
            }
        }
        None => anyhow::ensure!(cfg.autodetect, "set link.endpoint or enable link.autodetect"),
    }
    if cfg.autodetect {
        anyhow::ensure!(!cfg.candidate_devs().is_empty(), "link.candidate_devs is empty");
        anyhow::ensure!(!cfg.candidate_bauds().is_empty(), "link.candidate_bauds is empty");
        anyhow::ensure!(cfg.probe_timeout().as_millis() >= 200, "link.probe_timeout_ms too small; set >= 200");
    }
    Ok(())
}

pub fn check_timing(cfg: &LinkConfig) -> Result<()> {
    let s = cfg.session_settings();
    let rt = cfg.runtime_settings();
    let p = &s.reconnect;
    anyhow::ensure!(s.sys_id > 0, "link.sys_id must be 1..255");
    anyhow::ensure!(s.stream_rate_hz >= 1 && s.stream_rate_hz <= 50, "link.stream_rate_hz should be 1..50");
    if let Some(hz) = cfg.send_heartbeat_hz {
        anyhow::ensure!((0.0..=10.0).contains(&hz), "link.send_heartbeat_hz should be 0..10");
    }
    anyhow::ensure!(rt.poll_interval.as_millis() >= 10 && rt.poll_interval.as_millis() <= 1000,
        "link.poll_interval_ms should be 10..1000");
    anyhow::ensure!(rt.max_messages_per_cycle >= 1, "link.max_messages_per_cycle must be >= 1");
    anyhow::ensure!(rt.queue_capacity >= rt.max_messages_per_cycle,
        "link.queue_capacity smaller than max_messages_per_cycle");
    anyhow::ensure!(p.heartbeat_timeout > rt.poll_interval, "reconnect.heartbeat_timeout_ms must exceed poll interval");
    anyhow::ensure!(p.connect_timeout >= p.heartbeat_timeout / 2, "reconnect.connect_timeout_ms too small");
    anyhow::ensure!(p.max_attempts >= 1, "reconnect.max_attempts must be >= 1");
    Ok(())
}

pub fn check_motors(cfg: &LinkConfig) -> Result<()> {
    let m = cfg.motor_limits();
    anyhow::ensure!(m.count >= 1 && m.count <= 12, "motors.count should be 1..12");
    anyhow::ensure!(m.max_throttle_pct > 0.0 && m.max_throttle_pct <= 100.0, "motors.max_throttle_pct should be 0..100");
    if let Some(d) = cfg.motors.test_duration_s {
        anyhow::ensure!(d > 0.0 && d <= 10.0, "motors.test_duration_s should be 0..10");
    }
    Ok(())
}

pub fn check_params(cfg: &LinkConfig) -> Result<()> {
    if let Some(f) = cfg.params.metadata_file.as_deref() {
        let p = Path::new(f);
        anyhow::ensure!(p.is_file(), "params.metadata_file not found: {}", f);
        gcs_model::params::load_metadata(f)?;
    }
    Ok(())
}
