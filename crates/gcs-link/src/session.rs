//! The MAVLink session: everything that happens between a transport and the
//! shared [`Vehicle`] view.
//!
//! `Session` is synchronous and takes `now` on every call. The connector owns
//! one per link, feeds it messages from the reader queue, ticks it on the poll
//! interval and forwards the events it queues.

use gcs_model::logbook::Level;
use gcs_proto::link::LinkState;
use gcs_proto::telemetry::{Heartbeat, Telemetry};
use mavlink::common::{MavCmd, MavMessage};
use mavlink::MavHeader;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::calibration::{CalibrationKind, CalibrationProgress, CalibrationRun};
use crate::commands::{self, Target};
use crate::dispatch::{self, MessageStats};
use crate::error::LinkError;
use crate::modes;
use crate::motor_test::{self, MotorLimits, MotorTestMode, MotorTestRun};
use crate::params::{ParamSync, SyncAction};
use crate::safety::{CommandGuard, CommandKind};
use crate::state::Vehicle;
use crate::supervisor::{ReconnectPolicy, Supervisor, SupervisorAction};
use crate::transport::Transport;

/// Message types whose absence on a connected link is worth reporting.
const WATCHED: [&str; 4] = ["HEARTBEAT", "ATTITUDE", "GLOBAL_POSITION_INT", "SYS_STATUS"];

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub sys_id: u8,
    pub comp_id: u8,
    pub stream_rate_hz: u16,
    /// None disables the GCS heartbeat.
    pub heartbeat_interval: Option<Duration>,
    pub require_heartbeat: bool,
    pub command_min_interval: Duration,
    pub stale_after: Duration,
    /// Per message type debug log interval.
    pub log_throttle: Duration,
    pub reconnect: ReconnectPolicy,
    pub param_idle_timeout: Duration,
    pub param_max_retries: u32,
    pub fetch_params_on_connect: bool,
    pub motors: MotorLimits,
    pub log_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sys_id: 255,
            comp_id: 190,
            stream_rate_hz: 10,
            heartbeat_interval: Some(Duration::from_secs(1)),
            require_heartbeat: true,
            command_min_interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(3),
            log_throttle: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            param_idle_timeout: Duration::from_secs(2),
            param_max_retries: 3,
            fetch_params_on_connect: false,
            motors: MotorLimits::default(),
            log_capacity: 500,
        }
    }
}

/// What the link publishes to subscribers.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    State(LinkState),
    Telemetry(Telemetry),
    ParamsLoaded { received: usize, expected: usize },
    Calibration(CalibrationProgress),
    MotorTest { active: bool },
    Log { level: Level, text: String },
}

pub(crate) fn lock(v: &Mutex<Vehicle>) -> MutexGuard<'_, Vehicle> {
    // a panicked reader must not take the view down with it
    v.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Session {
    settings: SessionSettings,
    endpoint: String,
    transport: Option<Arc<dyn Transport>>,
    header: MavHeader,
    target: Target,
    target_known: bool,
    supervisor: Supervisor,
    stats: MessageStats,
    guard: CommandGuard,
    params: ParamSync,
    motor_run: Option<MotorTestRun>,
    calibration: Option<CalibrationRun>,
    last_gcs_heartbeat: Option<Instant>,
    last_armed: Option<bool>,
    last_mode: Option<String>,
    vehicle: Arc<Mutex<Vehicle>>,
    events: Vec<LinkEvent>,
}

impl Session {
    pub fn new(settings: SessionSettings, endpoint: impl Into<String>, now: Instant) -> Self {
        let vehicle = Arc::new(Mutex::new(Vehicle::new(settings.log_capacity)));
        let endpoint = endpoint.into();
        lock(&vehicle).status.endpoint = Some(endpoint.clone());
        Self {
            header: MavHeader { system_id: settings.sys_id, component_id: settings.comp_id, sequence: 0 },
            target: Target::default(),
            target_known: false,
            supervisor: Supervisor::new(settings.reconnect, now),
            stats: MessageStats::default(),
            guard: CommandGuard::new(settings.require_heartbeat, settings.command_min_interval),
            params: ParamSync::new(settings.param_idle_timeout, settings.param_max_retries, now),
            motor_run: None,
            calibration: None,
            last_gcs_heartbeat: None,
            last_armed: None,
            last_mode: None,
            transport: None,
            vehicle,
            events: Vec::new(),
            settings,
            endpoint,
        }
    }

    pub fn vehicle(&self) -> Arc<Mutex<Vehicle>> {
        Arc::clone(&self.vehicle)
    }

    pub fn state(&self) -> LinkState {
        self.supervisor.state()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Vehicle ids, once a heartbeat has named them.
    pub fn target(&self) -> Option<Target> {
        self.target_known.then_some(self.target)
    }

    pub fn stats(&self) -> &MessageStats {
        &self.stats
    }

    pub fn take_events(&mut self) -> Vec<LinkEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// The link is still wanted but the reader reported its transport gone.
    pub fn wants_transport(&self) -> bool {
        self.transport.is_none() && self.state().is_pending()
    }

    /// Installs a freshly opened transport. Outside of a reconnect this starts
    /// a new connection attempt.
    pub fn attach(&mut self, transport: Arc<dyn Transport>, now: Instant) {
        self.transport = Some(transport);
        match self.state() {
            LinkState::Reconnecting { attempt } => {
                self.log(Level::Info, format!("transport reopened (attempt {})", attempt));
            }
            _ => {
                self.target_known = false;
                self.supervisor.start(now);
                self.log(Level::Info, format!("connecting to {}", self.endpoint));
                self.publish_state();
            }
        }
        self.handshake(now);
    }

    pub fn transport_closed(&mut self, reason: &str, now: Instant) {
        let Some(t) = self.transport.take() else { return };
        t.close();
        self.log(Level::Warn, format!("transport closed: {}", reason));
        if let Some(action) = self.supervisor.on_transport_lost(now) {
            self.on_supervisor(action, now);
        }
    }

    pub fn record_dropped(&mut self, n: u64) {
        if n > 0 {
            lock(&self.vehicle).status.dropped += n;
        }
    }

    pub fn handle_message(&mut self, hdr: &MavHeader, msg: &MavMessage, now: Instant) {
        let name = self.stats.record(msg, now);
        if self.stats.should_log(name, self.settings.log_throttle, now) {
            debug!("rx {} from {}/{} (total {})", name, hdr.system_id, hdr.component_id,
                self.stats.get(name).map(|s| s.count).unwrap_or(0));
        }

        let is_heartbeat = matches!(msg, MavMessage::HEARTBEAT(_));
        let foreign = self.target_known && hdr.system_id != self.target.system;
        if foreign || (is_heartbeat && !dispatch::is_autopilot_heartbeat(msg)) {
            // other ground stations or vehicles on a shared link
            lock(&self.vehicle).status.received = self.stats.total();
            return;
        }
        if is_heartbeat {
            self.on_vehicle_heartbeat(hdr, now);
        }

        let Some(t) = dispatch::decode(hdr, msg) else {
            lock(&self.vehicle).status.received = self.stats.total();
            return;
        };

        match &t {
            Telemetry::Heartbeat(h) => self.note_heartbeat(h),
            Telemetry::StatusText(st) => match st.severity {
                0..=3 => self.log(Level::Error, format!("vehicle: {}", st.text)),
                4 => self.log(Level::Warn, format!("vehicle: {}", st.text)),
                5 | 6 => self.log(Level::Info, format!("vehicle: {}", st.text)),
                _ => debug!("vehicle debug: {}", st.text),
            },
            Telemetry::Param(p) => {
                lock(&self.vehicle).params.upsert_value(&p.name, p.value);
                if let Some(action) = self.params.on_value(p, now) {
                    self.apply_sync(action);
                }
            }
            Telemetry::CommandAck(ack) => {
                if let MavMessage::COMMAND_ACK(raw) = msg {
                    if raw.command == MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION {
                        if let Some(run) = self.calibration.as_mut() {
                            run.on_ack(raw.result);
                            let snap = run.snapshot();
                            self.publish_calibration(snap);
                        }
                    }
                }
                let level = if ack.accepted { Level::Info } else { Level::Warn };
                self.log(level, format!("{}: {}", ack.command, ack.result));
            }
            _ => {}
        }

        {
            let mut v = lock(&self.vehicle);
            v.snapshot.apply(&t, now);
            v.sensors.apply(&t);
            v.status.received = self.stats.total();
            v.status.last_msg = Some(name.to_string());
            if is_heartbeat {
                v.status.last_heartbeat = Some(now);
            }
        }
        self.events.push(LinkEvent::Telemetry(t));
    }

    fn on_vehicle_heartbeat(&mut self, hdr: &MavHeader, now: Instant) {
        if !self.target_known {
            self.target = Target { system: hdr.system_id, component: hdr.component_id };
            self.target_known = true;
            let mut v = lock(&self.vehicle);
            v.status.target_system = Some(hdr.system_id);
            v.status.target_component = Some(hdr.component_id);
        }
        match self.supervisor.on_heartbeat(now) {
            Some(SupervisorAction::Established) => {
                self.log(
                    Level::Info,
                    format!("connected to vehicle {}/{}", self.target.system, self.target.component),
                );
                self.publish_state();
                self.send_logged(&commands::request_data_streams(self.target, self.settings.stream_rate_hz), "stream request");
                let loaded = lock(&self.vehicle).params.is_loaded();
                if self.settings.fetch_params_on_connect && !loaded {
                    let action = self.params.start(now);
                    self.apply_sync(action);
                }
            }
            Some(SupervisorAction::Restored { attempts }) => {
                self.log(Level::Info, format!("link restored after {} attempt(s)", attempts));
                lock(&self.vehicle).status.reconnects += 1;
                self.publish_state();
                self.send_logged(&commands::request_data_streams(self.target, self.settings.stream_rate_hz), "stream request");
            }
            _ => {}
        }
    }

    fn note_heartbeat(&mut self, h: &Heartbeat) {
        if self.last_armed.is_some_and(|a| a != h.armed) {
            let text = if h.armed { "vehicle armed" } else { "vehicle disarmed" };
            self.log(Level::Info, text);
        }
        self.last_armed = Some(h.armed);
        if self.last_mode.as_deref() != Some(h.mode.as_str()) {
            if self.last_mode.is_some() {
                self.log(Level::Info, format!("mode changed to {}", h.mode));
            }
            self.last_mode = Some(h.mode.clone());
        }
    }

    /// Drives timers: watchdog, GCS heartbeat, parameter retries and
    /// scheduled motor steps.
    pub fn tick(&mut self, now: Instant) {
        if let Some(action) = self.supervisor.tick(now) {
            self.on_supervisor(action, now);
        }

        if let Some(iv) = self.settings.heartbeat_interval {
            let due = self.last_gcs_heartbeat.map(|t| now.saturating_duration_since(t) >= iv).unwrap_or(true);
            if due && self.transport.is_some() {
                self.send_gcs_heartbeat(now);
            }
        }

        if let Some(action) = self.params.tick(now) {
            self.apply_sync(action);
        }

        self.run_motor_steps(now);

        let connected = self.state().is_connected();
        let stale: Vec<String> = if connected {
            WATCHED
                .iter()
                .filter(|n| self.stats.is_stale(n, self.settings.stale_after, now))
                .map(|n| n.to_string())
                .collect()
        } else {
            Vec::new()
        };
        let counts = self.stats.summary();
        let mut v = lock(&self.vehicle);
        v.status.stale = stale;
        v.status.message_counts = counts.into_iter().map(|(n, c)| (n.to_string(), c)).collect();
    }

    fn on_supervisor(&mut self, action: SupervisorAction, now: Instant) {
        match action {
            SupervisorAction::Lost => {
                self.log(Level::Warn, "heartbeat lost, reconnecting");
                self.publish_state();
                self.handshake(now);
            }
            SupervisorAction::Retry { attempt } => {
                self.log(Level::Info, format!("reconnect attempt {}", attempt));
                self.publish_state();
                self.handshake(now);
            }
            SupervisorAction::GiveUp { reason } => {
                self.log(Level::Error, format!("link failed: {}", reason));
                self.abort_activities();
                self.close_transport();
                self.publish_state();
            }
            SupervisorAction::Established | SupervisorAction::Restored { .. } => {}
        }
    }

    /// Announce ourselves and, with a known vehicle, ask for streams again.
    fn handshake(&mut self, now: Instant) {
        if self.transport.is_none() {
            return;
        }
        self.send_gcs_heartbeat(now);
        if self.target_known {
            self.send_logged(&commands::request_data_streams(self.target, self.settings.stream_rate_hz), "stream request");
        }
    }

    fn send_gcs_heartbeat(&mut self, now: Instant) {
        self.last_gcs_heartbeat = Some(now);
        self.send_logged(&commands::gcs_heartbeat(), "gcs heartbeat");
    }

    fn apply_sync(&mut self, action: SyncAction) {
        match action {
            SyncAction::RequestList => {
                self.send_logged(&commands::param_request_list(self.target), "param list request");
            }
            SyncAction::RequestIndices(missing) => {
                for i in missing {
                    self.send_logged(&commands::param_request_read_index(self.target, i), "param read");
                }
            }
            SyncAction::Complete { received, expected } => {
                lock(&self.vehicle).params.mark_loaded();
                let level = if received == expected { Level::Info } else { Level::Warn };
                self.log(level, format!("parameters loaded: {}/{}", received, expected));
                self.events.push(LinkEvent::ParamsLoaded { received, expected });
            }
        }
    }

    fn run_motor_steps(&mut self, now: Instant) {
        let Some(run) = self.motor_run.as_mut() else { return };
        let due = run.due(now);
        let finished = run.is_finished(now);
        for step in due {
            info!("motor test: motor {} at {:.0}%", step.motor, step.throttle_pct);
            let msg = commands::motor_test(self.target, step.motor, step.throttle_pct, step.duration.as_secs_f32());
            self.send_logged(&msg, "motor test");
        }
        if finished {
            self.motor_run = None;
            self.set_motor_active(false);
            self.log(Level::Info, "motor test finished");
        }
    }

    // ---- commands ----

    pub fn arm(&mut self, arm: bool, now: Instant) -> Result<(), LinkError> {
        let kind = if arm { CommandKind::Arm } else { CommandKind::Disarm };
        if arm && self.motor_run.is_some() {
            return Err(LinkError::Refused("motor test in progress".into()));
        }
        self.check(kind, now)?;
        self.send(&commands::arm_disarm(self.target, arm))?;
        self.log(Level::Info, format!("{} requested", kind.as_str()));
        Ok(())
    }

    pub fn set_mode(&mut self, name: &str, now: Instant) -> Result<(), LinkError> {
        let id = modes::mode_id(name)?;
        self.check(CommandKind::SetMode, now)?;
        self.send(&commands::set_mode(self.target, id))?;
        let label = modes::mode_name(id).unwrap_or(name);
        self.log(Level::Info, format!("mode {} requested", label));
        Ok(())
    }

    pub fn request_streams(&mut self) -> Result<(), LinkError> {
        self.require_link()?;
        self.send(&commands::request_data_streams(self.target, self.settings.stream_rate_hz))
    }

    pub fn fetch_params(&mut self, now: Instant) -> Result<(), LinkError> {
        self.require_link()?;
        lock(&self.vehicle).params.clear();
        let action = self.params.start(now);
        self.apply_sync(action);
        self.log(Level::Info, "fetching parameters");
        Ok(())
    }

    pub fn params_pending(&self) -> bool {
        self.params.is_active()
    }

    /// Stores the value right away; the vehicle's PARAM_VALUE echo has the
    /// final word.
    pub fn set_param(&mut self, name: &str, value: f32) -> Result<(), LinkError> {
        self.require_link()?;
        if !value.is_finite() {
            return Err(LinkError::InvalidArgument(format!("{} = {}", name, value)));
        }
        let name = name.trim().to_ascii_uppercase();
        if name.is_empty() || name.len() > 16 {
            return Err(LinkError::InvalidArgument(format!("parameter name '{}'", name)));
        }
        {
            let mut v = lock(&self.vehicle);
            if v.params.is_loaded() && v.params.get(&name).is_none() {
                return Err(LinkError::UnknownParam(name));
            }
            v.params.upsert_value(&name, value);
        }
        self.send(&commands::param_set(self.target, &name, value))?;
        self.log(Level::Info, format!("set {} = {}", name, value));
        Ok(())
    }

    /// Asks the vehicle for one parameter by name.
    pub fn read_param(&mut self, name: &str) -> Result<(), LinkError> {
        self.require_link()?;
        self.send(&commands::param_request_read_name(self.target, &name.trim().to_ascii_uppercase()))
    }

    pub fn motor_test(&mut self, mode: MotorTestMode, throttle_pct: f32, now: Instant) -> Result<(), LinkError> {
        if self.is_armed() {
            return Err(LinkError::Refused("motor test while armed".into()));
        }
        if self.calibration.as_ref().is_some_and(|c| c.is_running()) {
            return Err(LinkError::Refused("calibration in progress".into()));
        }
        if self.motor_run.is_some() {
            return Err(LinkError::Refused("motor test already running".into()));
        }
        let steps = motor_test::plan(mode, throttle_pct, &self.settings.motors)?;
        self.check(CommandKind::MotorTest, now)?;
        self.log(Level::Info, format!("motor test {:?} at {:.0}%", mode, throttle_pct.clamp(0.0, self.settings.motors.max_throttle_pct)));
        self.motor_run = Some(MotorTestRun::new(steps, now));
        self.set_motor_active(true);
        self.run_motor_steps(now);
        Ok(())
    }

    /// Throttle 0 on every motor; cancels a running sequence. Not rate limited.
    pub fn stop_motors(&mut self) -> Result<(), LinkError> {
        if self.transport.is_none() {
            return Err(LinkError::NotConnected(self.state().to_string()));
        }
        let was_running = self.motor_run.take().is_some();
        let mut first_err = None;
        for step in motor_test::stop_steps(self.settings.motors.count) {
            if let Err(e) = self.send(&commands::motor_test(self.target, step.motor, 0.0, 0.0)) {
                first_err.get_or_insert(e);
            }
        }
        if was_running {
            self.set_motor_active(false);
        }
        self.log(Level::Info, "motors stopped");
        first_err.map_or(Ok(()), Err)
    }

    pub fn start_calibration(&mut self, kind: CalibrationKind, now: Instant) -> Result<(), LinkError> {
        if self.is_armed() {
            return Err(LinkError::Refused("calibration while armed".into()));
        }
        if self.motor_run.is_some() {
            return Err(LinkError::Refused("motor test in progress".into()));
        }
        if let Some(run) = self.calibration.as_ref().filter(|c| c.is_running()) {
            return Err(LinkError::Refused(format!("{} calibration already running", run.kind())));
        }
        self.check(CommandKind::Calibration, now)?;
        self.send(&commands::preflight_calibration(self.target, kind.command_params()))?;
        let run = CalibrationRun::new(kind);
        let snap = run.snapshot();
        self.calibration = Some(run);
        self.log(Level::Info, format!("{} calibration started: {}", kind, snap.instruction));
        self.publish_calibration(snap);
        Ok(())
    }

    pub fn next_calibration_step(&mut self) -> Result<CalibrationProgress, LinkError> {
        let run = self
            .calibration
            .as_mut()
            .ok_or_else(|| LinkError::Refused("no calibration running".into()))?;
        let finished = run.next_step()?;
        let kind = run.kind();
        let snap = run.snapshot();
        if finished && kind == CalibrationKind::Radio {
            // radio calibration ends when the GCS sends an empty calibration command
            self.send(&commands::preflight_calibration(self.target, [0.0; 7]))?;
        }
        self.log(Level::Info, format!("{} calibration: {}", kind, snap.instruction));
        self.publish_calibration(snap.clone());
        Ok(snap)
    }

    pub fn cancel_calibration(&mut self) -> Result<(), LinkError> {
        let Some(run) = self.calibration.as_mut().filter(|c| c.is_running()) else {
            return Err(LinkError::Refused("no calibration running".into()));
        };
        run.cancel();
        let snap = run.snapshot();
        self.send_logged(&commands::preflight_calibration(self.target, [0.0; 7]), "calibration cancel");
        self.log(Level::Warn, snap.instruction.clone());
        self.publish_calibration(snap);
        Ok(())
    }

    /// Stops motors and calibration on the vehicle, then closes the transport.
    pub fn stop(&mut self, now: Instant) {
        if self.motor_run.is_some() {
            if let Err(e) = self.stop_motors() {
                warn!("stopping motors on disconnect: {}", e);
            }
        }
        if self.calibration.as_ref().is_some_and(|c| c.is_running()) {
            if let Err(e) = self.cancel_calibration() {
                warn!("cancelling calibration on disconnect: {}", e);
            }
        }
        self.abort_activities();
        self.close_transport();
        self.supervisor.stop(now);
        self.log(Level::Info, "disconnected");
        self.publish_state();
    }

    // ---- helpers ----

    fn is_armed(&self) -> bool {
        lock(&self.vehicle).snapshot.is_armed().unwrap_or(false)
    }

    fn check(&mut self, kind: CommandKind, now: Instant) -> Result<(), LinkError> {
        if self.transport.is_none() {
            return Err(LinkError::NotConnected(self.state().to_string()));
        }
        let seen = self.supervisor.last_heartbeat().is_some();
        self.guard.check(kind, self.state(), seen, now)
    }

    fn require_link(&self) -> Result<(), LinkError> {
        if self.state().is_connected() && self.transport.is_some() {
            Ok(())
        } else {
            Err(LinkError::NotConnected(self.state().to_string()))
        }
    }

    fn abort_activities(&mut self) {
        self.params.cancel();
        if self.motor_run.take().is_some() {
            self.set_motor_active(false);
        }
        if let Some(run) = self.calibration.as_mut().filter(|c| c.is_running()) {
            run.cancel();
            let snap = run.snapshot();
            self.publish_calibration(snap);
        }
    }

    fn close_transport(&mut self) {
        if let Some(t) = self.transport.take() {
            t.close();
        }
    }

    fn send(&mut self, msg: &MavMessage) -> Result<(), LinkError> {
        let t = self
            .transport
            .as_ref()
            .ok_or_else(|| LinkError::NotConnected(self.supervisor.state().to_string()))?;
        self.header.sequence = self.header.sequence.wrapping_add(1);
        t.send(&self.header, msg)
    }

    fn send_logged(&mut self, msg: &MavMessage, what: &str) {
        if let Err(e) = self.send(msg) {
            warn!("{} not sent: {}", what, e);
        }
    }

    fn set_motor_active(&mut self, active: bool) {
        lock(&self.vehicle).motor_test_active = active;
        self.events.push(LinkEvent::MotorTest { active });
    }

    fn publish_state(&mut self) {
        let state = self.state();
        lock(&self.vehicle).status.state = state;
        self.events.push(LinkEvent::State(state));
    }

    fn publish_calibration(&mut self, snap: CalibrationProgress) {
        lock(&self.vehicle).calibration = Some(snap.clone());
        self.events.push(LinkEvent::Calibration(snap));
    }

    fn log(&mut self, level: Level, text: impl Into<String>) {
        let text = text.into();
        match level {
            Level::Info => info!("{}", text),
            Level::Warn => warn!("{}", text),
            Level::Error => error!("{}", text),
        }
        lock(&self.vehicle).log.push(level, text.clone());
        self.events.push(LinkEvent::Log { level, text });
    }
}
