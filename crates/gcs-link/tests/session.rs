mod common;

use common::*;
use gcs_link::calibration::{CalibrationKind, CalibrationStatus};
use gcs_link::motor_test::MotorTestMode;
use gcs_link::session::{LinkEvent, Session, SessionSettings};
use gcs_link::LinkError;
use gcs_proto::link::LinkState;
use mavlink::common::{MavCmd, MavMessage, MavResult, COMMAND_ACK_DATA};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn connected(settings: SessionSettings) -> (Session, Arc<FakeTransport>, Instant) {
    let t0 = Instant::now();
    let (t, _tx) = FakeTransport::new();
    let mut s = Session::new(settings, "test", t0);
    s.attach(t.clone(), t0);
    s.handle_message(&hdr(1), &heartbeat(false, 0), t0);
    assert_eq!(s.state(), LinkState::Connected);
    (s, t, t0)
}

#[test]
fn first_vehicle_heartbeat_connects() {
    let t0 = Instant::now();
    let (t, _tx) = FakeTransport::new();
    let mut s = Session::new(SessionSettings::default(), "test", t0);
    s.attach(t.clone(), t0);
    assert_eq!(s.state(), LinkState::Connecting);
    assert_eq!(t.count("HEARTBEAT"), 1);

    s.handle_message(&hdr(7), &heartbeat(false, 5), t0);
    assert_eq!(s.state(), LinkState::Connected);
    assert_eq!(s.target().map(|t| t.system), Some(7));
    assert_eq!(t.count("REQUEST_DATA_STREAM"), 1);

    let v = s.vehicle();
    let v = v.lock().unwrap();
    assert_eq!(v.status.state, LinkState::Connected);
    assert_eq!(v.status.target_system, Some(7));
    assert_eq!(v.snapshot.mode(), Some("LOITER"));
}

#[test]
fn ground_station_heartbeats_do_not_connect() {
    let t0 = Instant::now();
    let (t, _tx) = FakeTransport::new();
    let mut s = Session::new(SessionSettings::default(), "test", t0);
    s.attach(t, t0);
    s.handle_message(&hdr(200), &gcs_heartbeat(), t0);
    assert_eq!(s.state(), LinkState::Connecting);
    assert!(s.target().is_none());
}

#[test]
fn connect_timeout_fails_link() {
    let t0 = Instant::now();
    let (t, _tx) = FakeTransport::new();
    let mut s = Session::new(SessionSettings::default(), "test", t0);
    s.attach(t, t0);
    s.tick(t0 + Duration::from_secs(9));
    assert_eq!(s.state(), LinkState::Connecting);
    s.tick(t0 + Duration::from_secs(10));
    assert_eq!(s.state(), LinkState::Failed);
}

#[test]
fn heartbeat_loss_reconnects_and_restores() {
    let (mut s, t, t0) = connected(SessionSettings::default());
    t.clear();

    s.tick(t0 + Duration::from_secs(5));
    assert_eq!(s.state(), LinkState::Reconnecting { attempt: 1 });
    // handshake goes out on the same transport
    assert!(t.count("HEARTBEAT") >= 1);
    assert_eq!(t.count("REQUEST_DATA_STREAM"), 1);

    s.tick(t0 + Duration::from_secs(6));
    assert_eq!(s.state(), LinkState::Reconnecting { attempt: 2 });

    s.handle_message(&hdr(1), &heartbeat(false, 0), t0 + Duration::from_millis(6500));
    assert_eq!(s.state(), LinkState::Connected);
    assert_eq!(s.vehicle().lock().unwrap().status.reconnects, 1);
    assert!(!s.wants_transport());
}

#[test]
fn reconnect_gives_up_after_max_attempts() {
    let (mut s, t, t0) = connected(SessionSettings::default());
    for secs in 5..=7 {
        s.tick(t0 + Duration::from_secs(secs));
    }
    assert_eq!(s.state(), LinkState::Reconnecting { attempt: 3 });
    s.tick(t0 + Duration::from_secs(8));
    assert_eq!(s.state(), LinkState::Failed);

    let events = s.take_events();
    assert!(events.iter().any(|e| matches!(e, LinkEvent::State(LinkState::Failed))));
    assert!(matches!(s.arm(true, t0 + Duration::from_secs(9)), Err(LinkError::NotConnected(_))));
    assert!(t.is_closed());
    assert!(!s.has_transport());
}

#[test]
fn closed_transport_asks_for_a_new_one() {
    let (mut s, _t, t0) = connected(SessionSettings::default());
    s.transport_closed("unplugged", t0 + Duration::from_millis(100));
    assert_eq!(s.state(), LinkState::Reconnecting { attempt: 1 });
    assert!(s.wants_transport());

    let (t2, _tx2) = FakeTransport::new();
    s.attach(t2.clone(), t0 + Duration::from_millis(200));
    assert!(!s.wants_transport());
    assert_eq!(t2.count("HEARTBEAT"), 1);
    assert_eq!(s.state(), LinkState::Reconnecting { attempt: 1 });
}

#[test]
fn telemetry_updates_sensors_and_counts() {
    let (mut s, _t, t0) = connected(SessionSettings::default());
    s.handle_message(&hdr(1), &attitude(0.5), t0);
    s.handle_message(&hdr(1), &attitude(0.5), t0);
    s.tick(t0);

    let v = s.vehicle();
    let v = v.lock().unwrap();
    assert_eq!(v.sensors.get("roll").map(|r| r.value), Some(28.6));
    assert_eq!(v.status.received, 3);
    assert_eq!(v.status.last_msg.as_deref(), Some("ATTITUDE"));
    assert_eq!(v.status.message_counts.first(), Some(&("ATTITUDE".to_string(), 2)));
    // nothing watched has gone quiet yet, except never-seen ones
    assert!(v.status.stale.contains(&"SYS_STATUS".to_string()));
    assert!(!v.status.stale.contains(&"ATTITUDE".to_string()));
}

#[test]
fn other_systems_do_not_touch_the_vehicle() {
    let (mut s, _t, t0) = connected(SessionSettings::default());
    s.fetch_params(t0).unwrap();
    s.handle_message(&hdr(1), &attitude(0.5), t0);

    // a second vehicle or companion computer sharing the link
    s.handle_message(&hdr(2), &attitude(-1.0), t0);
    s.handle_message(&hdr(2), &param_value("RTL_ALT", 99.0, 0, 1), t0);
    s.handle_message(&hdr(2), &heartbeat(true, 5), t0);

    let v = s.vehicle();
    let v = v.lock().unwrap();
    assert_eq!(v.sensors.get("roll").map(|r| r.value), Some(28.6));
    assert!(v.params.get("RTL_ALT").is_none());
    assert_eq!(v.snapshot.is_armed(), Some(false));
    assert_eq!(v.status.target_system, Some(1));
    assert_eq!(v.status.received, 5);
    drop(v);
    assert!(s.params_pending());
}

#[test]
fn param_fetch_completes_and_retries_missing() {
    let (mut s, t, t0) = connected(SessionSettings::default());
    s.fetch_params(t0).unwrap();
    assert_eq!(t.count("PARAM_REQUEST_LIST"), 1);
    assert!(s.params_pending());

    s.handle_message(&hdr(1), &param_value("RTL_ALT", 1500.0, 0, 3), t0);
    s.handle_message(&hdr(1), &param_value("ANGLE_MAX", 3000.0, 2, 3), t0);
    s.tick(t0 + Duration::from_secs(2));
    assert_eq!(t.count("PARAM_REQUEST_READ"), 1);

    s.handle_message(&hdr(1), &param_value("ARMING_CHECK", 1.0, 1, 3), t0 + Duration::from_secs(2));
    assert!(!s.params_pending());
    let events = s.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, LinkEvent::ParamsLoaded { received: 3, expected: 3 })));

    let v = s.vehicle();
    let v = v.lock().unwrap();
    assert!(v.params.is_loaded());
    assert_eq!(v.params.get("RTL_ALT").map(|p| p.value), Some(1500.0));
}

#[test]
fn set_param_checks_loaded_table() {
    let (mut s, t, t0) = connected(SessionSettings::default());
    s.fetch_params(t0).unwrap();
    s.handle_message(&hdr(1), &param_value("RTL_ALT", 1500.0, 0, 1), t0);

    assert!(matches!(s.set_param("NOPE", 1.0), Err(LinkError::UnknownParam(_))));
    assert!(matches!(s.set_param("RTL_ALT", f32::NAN), Err(LinkError::InvalidArgument(_))));

    s.set_param("rtl_alt", 2000.0).unwrap();
    assert_eq!(t.count("PARAM_SET"), 1);
    assert_eq!(s.vehicle().lock().unwrap().params.get("RTL_ALT").map(|p| p.value), Some(2000.0));
}

#[test]
fn commands_are_rate_limited_per_kind() {
    let (mut s, t, t0) = connected(SessionSettings::default());
    s.arm(true, t0).unwrap();
    assert!(matches!(s.arm(true, t0 + Duration::from_millis(300)), Err(LinkError::RateLimited(_))));
    // other kinds keep their own clock
    s.set_mode("loiter", t0 + Duration::from_millis(300)).unwrap();
    s.arm(true, t0 + Duration::from_secs(1)).unwrap();
    assert_eq!(t.count("COMMAND_LONG"), 3);
    assert!(matches!(s.set_mode("WARP", t0 + Duration::from_secs(5)), Err(LinkError::UnknownMode(_))));
}

#[test]
fn commands_need_a_link() {
    let t0 = Instant::now();
    let mut s = Session::new(SessionSettings::default(), "test", t0);
    assert!(matches!(s.arm(true, t0), Err(LinkError::NotConnected(_))));
    assert!(matches!(s.fetch_params(t0), Err(LinkError::NotConnected(_))));
    assert!(matches!(s.stop_motors(), Err(LinkError::NotConnected(_))));
}

#[test]
fn motor_test_refused_when_armed() {
    let (mut s, t, t0) = connected(SessionSettings::default());
    s.handle_message(&hdr(1), &heartbeat(true, 0), t0);
    t.clear();
    let err = s.motor_test(MotorTestMode::Single(1), 10.0, t0).unwrap_err();
    assert!(matches!(err, LinkError::Refused(_)));
    assert!(t.sent_names().is_empty());
    assert!(matches!(s.start_calibration(CalibrationKind::Gyro, t0), Err(LinkError::Refused(_))));
}

#[test]
fn motor_sequence_runs_and_stops() {
    let (mut s, t, t0) = connected(SessionSettings::default());
    t.clear();
    s.motor_test(MotorTestMode::Sequence, 20.0, t0).unwrap();
    assert_eq!(t.count("COMMAND_LONG"), 1);
    assert!(s.vehicle().lock().unwrap().motor_test_active);
    // arming is refused while motors spin
    assert!(matches!(s.arm(true, t0), Err(LinkError::Refused(_))));

    s.tick(t0 + Duration::from_secs(1));
    assert_eq!(t.count("COMMAND_LONG"), 2);

    s.stop_motors().unwrap();
    // 2 steps + one stop per motor
    assert_eq!(t.count("COMMAND_LONG"), 6);
    assert!(!s.vehicle().lock().unwrap().motor_test_active);
}

#[test]
fn second_motor_test_is_refused_while_one_runs() {
    let (mut s, t, t0) = connected(SessionSettings::default());
    t.clear();
    s.motor_test(MotorTestMode::Sequence, 20.0, t0).unwrap();
    let err = s.motor_test(MotorTestMode::All, 50.0, t0).unwrap_err();
    assert!(matches!(err, LinkError::Refused(_)));
    assert_eq!(t.count("COMMAND_LONG"), 1);

    s.stop_motors().unwrap();
    s.motor_test(MotorTestMode::Single(2), 10.0, t0 + Duration::from_secs(2)).unwrap();
}

#[test]
fn gyro_calibration_finishes_on_ack() {
    let (mut s, t, t0) = connected(SessionSettings::default());
    s.start_calibration(CalibrationKind::Gyro, t0).unwrap();
    assert_eq!(t.count("COMMAND_LONG"), 1);
    assert!(matches!(s.start_calibration(CalibrationKind::Baro, t0), Err(LinkError::Refused(_))));

    let ack = MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
        command: MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION,
        result: MavResult::MAV_RESULT_ACCEPTED,
        ..Default::default()
    });
    s.handle_message(&hdr(1), &ack, t0 + Duration::from_secs(1));
    let cal = s.vehicle().lock().unwrap().calibration.clone().unwrap();
    assert_eq!(cal.status, CalibrationStatus::Succeeded);
}

#[test]
fn accel_calibration_walks_positions() {
    let (mut s, _t, t0) = connected(SessionSettings::default());
    s.start_calibration(CalibrationKind::Accel, t0).unwrap();
    let mut last = None;
    for _ in 0..6 {
        last = Some(s.next_calibration_step().unwrap());
    }
    let last = last.unwrap();
    assert_eq!(last.status, CalibrationStatus::Succeeded);
    assert!(matches!(s.cancel_calibration(), Err(LinkError::Refused(_))));
}

#[test]
fn statustext_lands_in_logbook() {
    let (mut s, _t, t0) = connected(SessionSettings::default());
    let mut text = [0u8; 50];
    text[..9].copy_from_slice(b"PreArm: x");
    let msg = MavMessage::STATUSTEXT(mavlink::common::STATUSTEXT_DATA {
        severity: mavlink::common::MavSeverity::MAV_SEVERITY_CRITICAL,
        text,
        ..Default::default()
    });
    s.handle_message(&hdr(1), &msg, t0);
    let v = s.vehicle();
    let v = v.lock().unwrap();
    let last = v.log.recent(1);
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].text, "vehicle: PreArm: x");
}

#[test]
fn stop_disconnects() {
    let (mut s, t, t0) = connected(SessionSettings::default());
    s.stop(t0);
    assert_eq!(s.state(), LinkState::Disconnected);
    assert!(!s.wants_transport());
    assert!(t.is_closed());
    assert!(matches!(s.request_streams(), Err(LinkError::NotConnected(_))));
}

#[test]
fn stop_winds_down_activities_even_when_sends_fail() {
    let (mut s, t, t0) = connected(SessionSettings::default());
    s.motor_test(MotorTestMode::Sequence, 20.0, t0).unwrap();
    t.fail_sends();
    s.stop(t0 + Duration::from_millis(100));

    assert_eq!(s.state(), LinkState::Disconnected);
    assert!(t.is_closed());
    assert!(!s.vehicle().lock().unwrap().motor_test_active);
    let events = s.take_events();
    assert!(events.iter().any(|e| matches!(e, LinkEvent::MotorTest { active: false })));
}
