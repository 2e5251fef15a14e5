use gcs_proto::link::LinkState;
use mavlink::common::MavMessage;
use mavlink::MavHeader;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::autodetect;
use crate::calibration::{CalibrationKind, CalibrationProgress};
use crate::endpoint::{Endpoint, SIM_LISTEN};
use crate::error::LinkError;
use crate::motor_test::MotorTestMode;
use crate::session::{lock, Session};
use crate::state::Vehicle;
use crate::transport::{MavlinkFactory, Transport, TransportFactory};
use crate::{LinkConfig, RuntimeSettings};

pub use crate::session::LinkEvent;

type Reply<T> = oneshot::Sender<Result<T, LinkError>>;

/// How long a stopping link waits for its reader thread to let go of the
/// transport.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

enum Command {
    Arm(bool, Reply<()>),
    SetMode(String, Reply<()>),
    FetchParams(Reply<()>),
    SetParam(String, f32, Reply<()>),
    ReadParam(String, Reply<()>),
    MotorTest(MotorTestMode, f32, Reply<()>),
    StopMotors(Reply<()>),
    Calibrate(CalibrationKind, Reply<()>),
    NextCalibrationStep(Reply<CalibrationProgress>),
    CancelCalibration(Reply<()>),
    RequestStreams(Reply<()>),
    Disconnect(oneshot::Sender<()>),
}

enum ReaderMsg {
    Message(MavHeader, MavMessage),
    Closed(String),
}

/// Caller side of a running link. Cheap to clone; the link stops when
/// `disconnect` is called or the last handle is dropped.
#[derive(Clone, Debug)]
pub struct LinkHandle {
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<LinkEvent>,
    state_rx: watch::Receiver<LinkState>,
    vehicle: Arc<Mutex<Vehicle>>,
    endpoint: Endpoint,
}

impl LinkHandle {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    pub fn vehicle(&self) -> Arc<Mutex<Vehicle>> {
        Arc::clone(&self.vehicle)
    }

    /// Runs `f` against the shared view under its lock.
    pub fn with_vehicle<R>(&self, f: impl FnOnce(&Vehicle) -> R) -> R {
        f(&lock(&self.vehicle))
    }

    pub async fn wait_for_state(
        &self,
        pred: impl Fn(&LinkState) -> bool,
        within: Duration,
    ) -> Result<LinkState, LinkError> {
        let mut rx = self.state_rx.clone();
        let res = match timeout(within, rx.wait_for(|s| pred(s))).await {
            Ok(Ok(s)) => Ok(*s),
            Ok(Err(_)) => Err(LinkError::Stopped),
            Err(_) => Err(LinkError::Timeout("link state")),
        };
        res
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(make(tx)).await.map_err(|_| LinkError::Stopped)?;
        rx.await.map_err(|_| LinkError::Stopped)?
    }

    pub async fn arm(&self) -> Result<(), LinkError> {
        self.request(|r| Command::Arm(true, r)).await
    }

    pub async fn disarm(&self) -> Result<(), LinkError> {
        self.request(|r| Command::Arm(false, r)).await
    }

    pub async fn set_mode(&self, name: &str) -> Result<(), LinkError> {
        let name = name.to_string();
        self.request(|r| Command::SetMode(name, r)).await
    }

    /// Starts a full parameter download and returns immediately.
    pub async fn fetch_params(&self) -> Result<(), LinkError> {
        self.request(Command::FetchParams).await
    }

    /// Fetches all parameters and waits for the download to finish.
    /// Returns (received, expected).
    pub async fn load_params(&self, within: Duration) -> Result<(usize, usize), LinkError> {
        let mut events = self.subscribe();
        self.fetch_params().await?;
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(LinkEvent::ParamsLoaded { received, expected }) => return Ok((received, expected)),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => debug!("param wait lagged {} events", n),
                    Err(broadcast::error::RecvError::Closed) => return Err(LinkError::Stopped),
                }
            }
        };
        timeout(within, wait).await.map_err(|_| LinkError::Timeout("parameters"))?
    }

    pub async fn set_param(&self, name: &str, value: f32) -> Result<(), LinkError> {
        let name = name.to_string();
        self.request(|r| Command::SetParam(name, value, r)).await
    }

    pub async fn read_param(&self, name: &str) -> Result<(), LinkError> {
        let name = name.to_string();
        self.request(|r| Command::ReadParam(name, r)).await
    }

    pub async fn motor_test(&self, mode: MotorTestMode, throttle_pct: f32) -> Result<(), LinkError> {
        self.request(|r| Command::MotorTest(mode, throttle_pct, r)).await
    }

    pub async fn stop_motors(&self) -> Result<(), LinkError> {
        self.request(Command::StopMotors).await
    }

    pub async fn calibrate(&self, kind: CalibrationKind) -> Result<(), LinkError> {
        self.request(|r| Command::Calibrate(kind, r)).await
    }

    pub async fn next_calibration_step(&self) -> Result<CalibrationProgress, LinkError> {
        self.request(Command::NextCalibrationStep).await
    }

    pub async fn cancel_calibration(&self) -> Result<(), LinkError> {
        self.request(Command::CancelCalibration).await
    }

    pub async fn request_streams(&self) -> Result<(), LinkError> {
        self.request(Command::RequestStreams).await
    }

    /// Stops the link and waits until the transport is released.
    pub async fn disconnect(self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Disconnect(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Endpoint from config: explicit string, else serial autodetect, else error.
/// Autodetect blocks while probing.
pub fn resolve_endpoint(cfg: &LinkConfig) -> Result<Endpoint, LinkError> {
    if let Some(ep) = cfg.endpoint.as_deref() {
        return ep.parse();
    }
    if cfg.autodetect {
        let res = autodetect::autodetect(&cfg.candidate_devs(), &cfg.candidate_bauds(), cfg.probe_timeout());
        return match res.chosen {
            Some((dev, baud)) => Ok(Endpoint::Serial { dev, baud }),
            None => Err(LinkError::Open {
                endpoint: "autodetect".into(),
                reason: format!("no heartbeat on {} probes", res.probes.len()),
            }),
        };
    }
    Err(LinkError::Endpoint("no endpoint configured".into()))
}

pub async fn connect(cfg: &LinkConfig, endpoint: Endpoint) -> Result<LinkHandle, LinkError> {
    connect_with(cfg, endpoint, Arc::new(MavlinkFactory)).await
}

/// Opens the transport, starts the reader and session task, then waits for
/// the first heartbeat. Fails with `NoHeartbeat` if the connect timeout
/// passes first.
pub async fn connect_with(
    cfg: &LinkConfig,
    endpoint: Endpoint,
    factory: Arc<dyn TransportFactory>,
) -> Result<LinkHandle, LinkError> {
    let settings = cfg.session_settings();
    let rt = cfg.runtime_settings();
    let connect_timeout = settings.reconnect.connect_timeout;

    // the simulator endpoint is a local UDP listener plus a simulated vehicle
    let listen = match &endpoint {
        Endpoint::Sim => SIM_LISTEN.parse()?,
        other => other.clone(),
    };

    let transport = open_blocking(&factory, &listen).await?;
    let sim = match endpoint {
        Endpoint::Sim => Some(
            gcs_sim::spawn(gcs_sim::SimConfig::default())
                .map_err(|e| LinkError::Open { endpoint: "sim".into(), reason: format!("{:#}", e) })?,
        ),
        _ => None,
    };

    let (reader_tx, reader_rx) = mpsc::channel(rt.queue_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let reader = spawn_reader(Arc::clone(&transport), reader_tx.clone(), Arc::clone(&dropped))?;

    let mut session = Session::new(settings, endpoint.to_string(), Instant::now());
    if let Some(path) = cfg.params.metadata_file.as_deref() {
        match gcs_model::params::load_metadata(path) {
            Ok(meta) => {
                let n = meta.len();
                lock(&session.vehicle()).params.apply_metadata(meta);
                debug!("param metadata: {} entries from {}", n, path);
            }
            Err(e) => warn!("param metadata {} not loaded: {:#}", path, e),
        }
    }
    session.attach(transport, Instant::now());

    let (events_tx, _) = broadcast::channel(1024);
    let (state_tx, state_rx) = watch::channel(session.state());
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let vehicle = session.vehicle();

    let task = LinkTask {
        session,
        cmd_rx,
        reader_rx,
        reader_tx,
        reader: Some(reader),
        dropped,
        factory,
        listen,
        events: events_tx.clone(),
        state_tx,
        rt,
        sim,
    };
    tokio::spawn(task.run());

    let handle = LinkHandle { cmd_tx, events: events_tx, state_rx, vehicle, endpoint };
    let settled = handle
        .wait_for_state(
            |s| !matches!(s, LinkState::Connecting),
            connect_timeout + Duration::from_secs(1),
        )
        .await;
    match settled {
        Ok(LinkState::Connected) => {
            info!("link up: {}", handle.endpoint);
            Ok(handle)
        }
        Ok(_) | Err(LinkError::Timeout(_)) => {
            handle.disconnect().await;
            Err(LinkError::NoHeartbeat(connect_timeout))
        }
        Err(e) => Err(e),
    }
}

async fn open_blocking(
    factory: &Arc<dyn TransportFactory>,
    endpoint: &Endpoint,
) -> Result<Arc<dyn Transport>, LinkError> {
    let f = Arc::clone(factory);
    let ep = endpoint.clone();
    tokio::task::spawn_blocking(move || f.open(&ep))
        .await
        .map_err(|e| LinkError::Open { endpoint: endpoint.to_string(), reason: e.to_string() })?
}

struct Reader {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Blocking `recv` loop on its own thread. A full queue drops the message
/// and bumps `dropped`; a closed queue or the stop flag ends the thread,
/// which drops its transport reference on the way out.
fn spawn_reader(
    transport: Arc<dyn Transport>,
    tx: mpsc::Sender<ReaderMsg>,
    dropped: Arc<AtomicU64>,
) -> Result<Reader, LinkError> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let thread = std::thread::Builder::new()
        .name("mav-reader".into())
        .spawn(move || {
            let mut transient: u64 = 0;
            loop {
                let res = transport.recv();
                if flag.load(Ordering::Acquire) {
                    break;
                }
                match res {
                    Ok((hdr, msg)) => match tx.try_send(ReaderMsg::Message(hdr, msg)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(TrySendError::Closed(_)) => break,
                    },
                    Err(e) if e.is_transient() => {
                        transient += 1;
                        if transient % 100 == 1 {
                            debug!("reader: {} (x{})", e, transient);
                        }
                        if tx.is_closed() {
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Err(e) => {
                        // wait for room, unless the link is already letting go
                        let mut msg = ReaderMsg::Closed(e.to_string());
                        while let Err(TrySendError::Full(back)) = tx.try_send(msg) {
                            if flag.load(Ordering::Acquire) {
                                break;
                            }
                            msg = back;
                            std::thread::sleep(Duration::from_millis(5));
                        }
                        break;
                    }
                }
            }
            debug!("reader exit");
        })
        .map_err(|e| LinkError::Open { endpoint: "reader thread".into(), reason: e.to_string() })?;
    Ok(Reader { stop, thread })
}

struct LinkTask {
    session: Session,
    cmd_rx: mpsc::Receiver<Command>,
    reader_rx: mpsc::Receiver<ReaderMsg>,
    reader_tx: mpsc::Sender<ReaderMsg>,
    reader: Option<Reader>,
    dropped: Arc<AtomicU64>,
    factory: Arc<dyn TransportFactory>,
    listen: Endpoint,
    events: broadcast::Sender<LinkEvent>,
    state_tx: watch::Sender<LinkState>,
    rt: RuntimeSettings,
    sim: Option<gcs_sim::SimHandle>,
}

impl LinkTask {
    async fn run(mut self) {
        let mut poll = interval(self.rt.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let retry = self.session.settings().reconnect.retry_interval;
        let mut last_reopen: Option<Instant> = None;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if let Some(done) = self.handle_command(cmd) {
                            self.shutdown().await;
                            let _ = done.send(());
                            break;
                        }
                        self.flush();
                    }
                    None => {
                        // every handle dropped
                        self.shutdown().await;
                        break;
                    }
                },
                _ = poll.tick() => {
                    let now = Instant::now();
                    self.drain(now);
                    self.session.record_dropped(self.dropped.swap(0, Ordering::Relaxed));
                    self.session.tick(now);
                    if !self.session.has_transport() {
                        self.stop_reader().await;
                    }

                    let reopen_due = last_reopen.map(|t| now.duration_since(t) >= retry).unwrap_or(true);
                    if self.session.wants_transport() && reopen_due {
                        last_reopen = Some(now);
                        self.reopen().await;
                    }
                    self.flush();
                }
            }
        }

        debug!("link task exit");
    }

    async fn shutdown(&mut self) {
        self.session.stop(Instant::now());
        self.stop_reader().await;
        if let Some(sim) = self.sim.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || sim.stop()).await {
                warn!("simulator stop: {}", e);
            }
        }
        self.flush();
    }

    /// Flags the reader and waits for its thread, so the transport is gone
    /// once this returns. A reader stuck in a read that never times out is
    /// left behind after `READER_JOIN_TIMEOUT`.
    async fn stop_reader(&mut self) {
        let Some(reader) = self.reader.take() else { return };
        reader.stop.store(true, Ordering::Release);
        let thread = reader.thread;
        match timeout(READER_JOIN_TIMEOUT, tokio::task::spawn_blocking(move || thread.join())).await {
            Ok(Ok(Ok(()))) => debug!("reader stopped"),
            Ok(_) => warn!("reader thread panicked"),
            Err(_) => warn!("reader still blocked after {:?}, leaving it", READER_JOIN_TIMEOUT),
        }
    }

    /// Up to `max_messages_per_cycle` queued messages per poll.
    fn drain(&mut self, now: Instant) {
        for _ in 0..self.rt.max_messages_per_cycle {
            match self.reader_rx.try_recv() {
                Ok(ReaderMsg::Message(hdr, msg)) => self.session.handle_message(&hdr, &msg, now),
                Ok(ReaderMsg::Closed(reason)) => self.session.transport_closed(&reason, now),
                Err(_) => break,
            }
        }
    }

    async fn reopen(&mut self) {
        self.stop_reader().await;
        match open_blocking(&self.factory, &self.listen).await {
            Ok(t) => match spawn_reader(Arc::clone(&t), self.reader_tx.clone(), Arc::clone(&self.dropped)) {
                Ok(reader) => {
                    self.reader = Some(reader);
                    self.session.attach(t, Instant::now());
                }
                Err(e) => warn!("reader restart failed: {}", e),
            },
            Err(e) => warn!("reopen {} failed: {}", self.listen, e),
        }
    }

    /// Runs one command; a disconnect comes back for the loop to finish.
    fn handle_command(&mut self, cmd: Command) -> Option<oneshot::Sender<()>> {
        let s = &mut self.session;
        let now = Instant::now();
        match cmd {
            Command::Arm(arm, r) => { let _ = r.send(s.arm(arm, now)); }
            Command::SetMode(name, r) => { let _ = r.send(s.set_mode(&name, now)); }
            Command::FetchParams(r) => { let _ = r.send(s.fetch_params(now)); }
            Command::SetParam(name, v, r) => { let _ = r.send(s.set_param(&name, v)); }
            Command::ReadParam(name, r) => { let _ = r.send(s.read_param(&name)); }
            Command::MotorTest(mode, thr, r) => { let _ = r.send(s.motor_test(mode, thr, now)); }
            Command::StopMotors(r) => { let _ = r.send(s.stop_motors()); }
            Command::Calibrate(kind, r) => { let _ = r.send(s.start_calibration(kind, now)); }
            Command::NextCalibrationStep(r) => { let _ = r.send(s.next_calibration_step()); }
            Command::CancelCalibration(r) => { let _ = r.send(s.cancel_calibration()); }
            Command::RequestStreams(r) => { let _ = r.send(s.request_streams()); }
            Command::Disconnect(done) => return Some(done),
        }
        None
    }

    fn flush(&mut self) {
        for ev in self.session.take_events() {
            if let LinkEvent::State(st) = &ev {
                self.state_tx.send_replace(*st);
            }
            // no subscribers is fine
            let _ = self.events.send(ev);
        }
    }
}
