pub mod vehicle;

use anyhow::{Context, Result};
use gcs_proto::udp;
use mavlink::common::MavMessage;
use mavlink::{MavConnection, MavHeader};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use vehicle::SimVehicle;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Where the simulated vehicle sends from; the GCS listens there.
    pub endpoint: String,
    pub rate_hz: u32,
    pub system_id: u8,
    pub component_id: u8,
    pub home_lat: f64,
    pub home_lon: f64,
    pub home_alt_m: f32,
    /// Leave out every Nth PARAM_VALUE of the first list request.
    pub param_drop_every: Option<u16>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            endpoint: "udpout:127.0.0.1:14551".into(),
            rate_hz: 10,
            system_id: 1,
            component_id: 1,
            home_lat: 51.1657,
            home_lon: 10.4515,
            home_alt_m: 120.0,
            param_drop_every: None,
        }
    }
}

type Conn = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

struct Shared {
    vehicle: Mutex<SimVehicle>,
    header: Mutex<MavHeader>,
    stop: AtomicBool,
}

impl Shared {
    fn send_all(&self, conn: &Conn, msgs: &[MavMessage]) {
        let mut hdr = self.header.lock().unwrap_or_else(|e| e.into_inner());
        for m in msgs {
            hdr.sequence = hdr.sequence.wrapping_add(1);
            if let Err(e) = conn.send(&hdr, m) {
                debug!("sim send: {}", e);
            }
        }
    }
}

/// Running simulator. `stop` ends both threads and closes the socket;
/// dropping the handle only flags them.
pub struct SimHandle {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl SimHandle {
    pub fn stop(mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        for t in self.threads.drain(..) {
            let name = t.thread().name().unwrap_or("sim").to_string();
            if t.join().is_err() {
                warn!("{} thread panicked", name);
            }
        }
        info!("simulator stopped");
    }

    pub fn is_armed(&self) -> bool {
        self.shared.vehicle.lock().map(|v| v.armed).unwrap_or(false)
    }

    pub fn param(&self, name: &str) -> Option<f32> {
        self.shared.vehicle.lock().ok().and_then(|v| v.param(name))
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
    }
}

pub fn spawn(cfg: SimConfig) -> Result<SimHandle> {
    anyhow::ensure!(cfg.rate_hz >= 1 && cfg.rate_hz <= 100, "sim.rate_hz should be 1..100");
    let conn: Conn = Arc::from(
        udp::connect(&cfg.endpoint, udp::DEFAULT_READ_TIMEOUT)
            .with_context(|| format!("sim connect {}", cfg.endpoint))?,
    );
    let shared = Arc::new(Shared {
        header: Mutex::new(MavHeader { system_id: cfg.system_id, component_id: cfg.component_id, sequence: 0 }),
        vehicle: Mutex::new(SimVehicle::new(cfg.clone())),
        stop: AtomicBool::new(false),
    });
    let period = Duration::from_secs_f64(1.0 / cfg.rate_hz as f64);

    let telemetry = {
        let shared = Arc::clone(&shared);
        let conn = Arc::clone(&conn);
        std::thread::Builder::new()
            .name("sim-telemetry".into())
            .spawn(move || {
                while !shared.stop.load(Ordering::Relaxed) {
                    let frame = {
                        let mut v = shared.vehicle.lock().unwrap_or_else(|e| e.into_inner());
                        v.telemetry(period.as_secs_f32())
                    };
                    shared.send_all(&conn, &frame);
                    std::thread::sleep(period);
                }
            })
            .context("spawn sim telemetry thread")?
    };

    let rx = {
        let shared = Arc::clone(&shared);
        let conn = Arc::clone(&conn);
        std::thread::Builder::new()
            .name("sim-rx".into())
            .spawn(move || {
                while !shared.stop.load(Ordering::Relaxed) {
                    match conn.recv() {
                        Ok((_, msg)) => {
                            let replies = {
                                let mut v = shared.vehicle.lock().unwrap_or_else(|e| e.into_inner());
                                v.handle(&msg)
                            };
                            shared.send_all(&conn, &replies);
                        }
                        Err(mavlink::error::MessageReadError::Io(e))
                            if !matches!(
                                e.kind(),
                                std::io::ErrorKind::WouldBlock
                                    | std::io::ErrorKind::TimedOut
                                    | std::io::ErrorKind::Interrupted
                            ) =>
                        {
                            warn!("sim recv: {}", e);
                            break;
                        }
                        Err(_) => {}
                    }
                }
            })
            .context("spawn sim rx thread")?
    };

    info!("simulator sending to {} at {} Hz", cfg.endpoint, cfg.rate_hz);
    Ok(SimHandle { shared, threads: vec![telemetry, rx] })
}
