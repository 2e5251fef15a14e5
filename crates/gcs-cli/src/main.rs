use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

use gcs_link::autodetect::autodetect;
use gcs_link::calibration::{CalibrationKind, CalibrationProgress, CalibrationStatus};
use gcs_link::connector::resolve_endpoint;
use gcs_link::motor_test::MotorTestMode;
use gcs_link::transport::list_ports;
use gcs_link::{doctor, Endpoint, LinkConfig, LinkError, LinkEvent, LinkHandle};
use gcs_model::logbook::Level;
use gcs_proto::link::LinkState;
use gcs_proto::telemetry::{EventKind, Telemetry, TelemetryEvent};
use gcs_sim::SimConfig;

#[derive(Debug, Parser)]
#[command(name = "gcs", version, about = "RZGCS - MAVLink ground control link")]
struct Cli {
    #[arg(long)]
    config: Option<String>,

    /// Overrides link.endpoint, e.g. serial:/dev/ttyACM0:115200, udpin:0.0.0.0:14550, sim
    #[arg(long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config.
    Doctor,
    /// List serial ports.
    Ports,
    /// Probe serial ports/bauds for MAVLink heartbeats.
    Autodetect,
    /// Stream telemetry until Ctrl-C or --seconds.
    Monitor {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        seconds: Option<u64>,
    },
    Params { #[command(subcommand)] cmd: ParamsCmd },
    Arm,
    Disarm,
    /// Switch flight mode (ArduCopter names: STABILIZE, LOITER, RTL, ...).
    Mode { name: String },
    MotorTest {
        #[arg(long, value_enum, default_value_t = MotorMode::Single)]
        mode: MotorMode,
        /// 1-based motor number for --mode single.
        #[arg(long, default_value_t = 1)]
        motor: u8,
        #[arg(long, default_value_t = 10.0)]
        throttle: f32,
    },
    /// gyro | compass | accel | level | baro | radio
    Calibrate { kind: String },
    /// Run the simulated vehicle until Ctrl-C.
    Sim,
}

#[derive(Debug, Subcommand)]
enum ParamsCmd {
    List { filter: Option<String> },
    Get { name: String },
    Set { name: String, value: f32 },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MotorMode { Single, Sequence, All }

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    link: LinkConfig,
    sim: Option<SimConfig>,
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let Some(path) = path else { return Ok(Config::default()) };
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

const ACK_WAIT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_deref())?;
    if let Some(ep) = cli.endpoint {
        cfg.link.endpoint = Some(ep);
    }

    match cli.cmd {
        Command::Doctor => doctor_cmd(&cfg)?,
        Command::Ports => {
            for p in list_ports() {
                println!("{}", p);
            }
        }
        Command::Autodetect => autodetect_cmd(&cfg).await?,
        Command::Monitor { json, seconds } => monitor(&cfg, json, seconds).await?,
        Command::Params { cmd } => params_cmd(&cfg, cmd).await?,
        Command::Arm => {
            let link = open_link(&cfg).await?;
            let events = link.subscribe();
            link.arm().await?;
            report_ack(events).await;
            link.disconnect().await;
        }
        Command::Disarm => {
            let link = open_link(&cfg).await?;
            let events = link.subscribe();
            link.disarm().await?;
            report_ack(events).await;
            link.disconnect().await;
        }
        Command::Mode { name } => {
            let link = open_link(&cfg).await?;
            let events = link.subscribe();
            link.set_mode(&name).await?;
            report_ack(events).await;
            link.disconnect().await;
        }
        Command::MotorTest { mode, motor, throttle } => {
            let mode = match mode {
                MotorMode::Single => MotorTestMode::Single(motor),
                MotorMode::Sequence => MotorTestMode::Sequence,
                MotorMode::All => MotorTestMode::All,
            };
            motor_test_cmd(&cfg, mode, throttle).await?
        }
        Command::Calibrate { kind } => calibrate_cmd(&cfg, kind.parse()?).await?,
        Command::Sim => sim_cmd(&cfg).await?,
    }
    Ok(())
}

fn doctor_cmd(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    doctor::check_endpoint(&cfg.link)?;
    doctor::check_timing(&cfg.link)?;
    doctor::check_motors(&cfg.link)?;
    doctor::check_params(&cfg.link)?;
    if let Some(sim) = &cfg.sim {
        anyhow::ensure!(sim.endpoint.parse::<Endpoint>().is_ok(), "sim.endpoint invalid: {}", sim.endpoint);
        anyhow::ensure!(sim.home_lat.abs() <= 90.0 && sim.home_lon.abs() <= 180.0, "sim home coordinates invalid");
    }
    info!("doctor: OK");
    Ok(())
}

async fn autodetect_cmd(cfg: &Config) -> Result<()> {
    let devs = cfg.link.candidate_devs();
    let bauds = cfg.link.candidate_bauds();
    let timeout = cfg.link.probe_timeout();
    let res = tokio::task::spawn_blocking(move || autodetect(&devs, &bauds, timeout))
        .await
        .context("autodetect task")?;
    if let Some((dev, baud)) = &res.chosen {
        println!("CHOSEN: {} @ {}", dev, baud);
    } else {
        println!("CHOSEN: none");
    }
    for p in res.probes {
        println!("probe dev={} baud={} hb={} {}ms note={}", p.dev, p.baud, p.hb_seen, p.elapsed_ms, p.note);
    }
    Ok(())
}

async fn open_link(cfg: &Config) -> Result<LinkHandle> {
    let link_cfg = cfg.link.clone();
    let endpoint = tokio::task::spawn_blocking(move || resolve_endpoint(&link_cfg))
        .await
        .context("resolve endpoint")??;
    info!("connecting: {}", endpoint);
    let link = gcs_link::connect(&cfg.link, endpoint).await.context("connect")?;
    Ok(link)
}

fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn to_event(ev: &LinkEvent, state: LinkState) -> Option<TelemetryEvent> {
    let (kind, telemetry, msg) = match ev {
        LinkEvent::State(s) => (EventKind::State, None, s.to_string()),
        LinkEvent::Telemetry(t) => (EventKind::Telemetry, Some(t.clone()), String::new()),
        LinkEvent::Log { text, .. } => (EventKind::Log, None, text.clone()),
        LinkEvent::ParamsLoaded { received, expected } => {
            (EventKind::Log, None, format!("parameters loaded: {}/{}", received, expected))
        }
        LinkEvent::Calibration(_) | LinkEvent::MotorTest { .. } => return None,
    };
    Some(TelemetryEvent { ts_unix_ms: now_ms(), kind, state, telemetry, msg })
}

async fn monitor(cfg: &Config, json: bool, seconds: Option<u64>) -> Result<()> {
    let link = open_link(cfg).await?;
    let mut events = link.subscribe();
    let mut table_tick = tokio::time::interval(Duration::from_secs(1));
    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            ev = events.recv() => match ev {
                Ok(ev) => {
                    if json {
                        if let Some(te) = to_event(&ev, link.state()) {
                            println!("{}", serde_json::to_string(&te)?);
                        }
                    } else if let LinkEvent::Log { level, text } = &ev {
                        let tag = match level { Level::Info => "", Level::Warn => "WARN ", Level::Error => "ERR " };
                        println!("{}{}", tag, text);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("monitor lagged, {} events skipped", n),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = table_tick.tick(), if !json => print_sensors(&link),
        }
    }
    link.disconnect().await;
    Ok(())
}

fn print_sensors(link: &LinkHandle) {
    link.with_vehicle(|v| {
        let st = &v.status;
        println!(
            "-- {} rx={} dropped={} hb_age={:?} mode={} armed={}",
            st.state,
            st.received,
            st.dropped,
            st.hb_age(),
            v.snapshot.mode().unwrap_or("?"),
            v.snapshot.is_armed().map(|a| a.to_string()).unwrap_or_else(|| "?".into()),
        );
        if !st.stale.is_empty() {
            println!("   stale: {}", st.stale.join(", "));
        }
        for s in v.sensors.iter() {
            println!("   {:<20} {:>12} {}", s.name, s.formatted_value(), s.unit);
        }
    });
}

async fn params_cmd(cfg: &Config, cmd: ParamsCmd) -> Result<()> {
    let link = open_link(cfg).await?;
    let res = params_inner(&link, cmd).await;
    link.disconnect().await;
    res
}

async fn params_inner(link: &LinkHandle, cmd: ParamsCmd) -> Result<()> {
    match cmd {
        ParamsCmd::List { filter } => {
            let (received, expected) = link.load_params(Duration::from_secs(60)).await?;
            if received < expected {
                warn!("only {}/{} parameters received", received, expected);
            }
            link.with_vehicle(|v| {
                for p in v.params.filter(filter.as_deref().unwrap_or("")) {
                    println!("{:<16} {:>12} {}", p.name, p.value, p.desc);
                }
            });
        }
        ParamsCmd::Get { name } => {
            let name = name.to_ascii_uppercase();
            let events = link.subscribe();
            link.read_param(&name).await?;
            let value = wait_param(events, &name).await.with_context(|| format!("no value for {}", name))?;
            println!("{} = {}", name, value);
        }
        ParamsCmd::Set { name, value } => {
            let name = name.to_ascii_uppercase();
            let events = link.subscribe();
            link.set_param(&name, value).await?;
            match wait_param(events, &name).await {
                Some(v) => println!("{} = {} (confirmed)", name, v),
                None => anyhow::bail!("{} not confirmed by vehicle", name),
            }
        }
    }
    Ok(())
}

async fn wait_param(mut events: broadcast::Receiver<LinkEvent>, name: &str) -> Option<f32> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(LinkEvent::Telemetry(Telemetry::Param(p))) if p.name == name => return Some(p.value),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(ACK_WAIT, wait).await.ok().flatten()
}

async fn report_ack(mut events: broadcast::Receiver<LinkEvent>) {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(LinkEvent::Telemetry(Telemetry::CommandAck(a))) => return Some(a),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    match tokio::time::timeout(ACK_WAIT, wait).await.ok().flatten() {
        Some(a) => println!("{}: {}", a.command, a.result),
        None => println!("no COMMAND_ACK within {:?}", ACK_WAIT),
    }
}

async fn motor_test_cmd(cfg: &Config, mode: MotorTestMode, throttle: f32) -> Result<()> {
    let link = open_link(cfg).await?;
    let mut events = link.subscribe();
    if let Err(e) = link.motor_test(mode, throttle).await {
        link.disconnect().await;
        return Err(e.into());
    }
    let limits = cfg.link.motor_limits();
    let budget = limits.duration + limits.sequence_step * limits.count as u32 + Duration::from_secs(2);
    let done = async {
        loop {
            match events.recv().await {
                Ok(LinkEvent::MotorTest { active: false }) => return,
                Ok(LinkEvent::Telemetry(Telemetry::CommandAck(a))) if !a.accepted => {
                    println!("{}: {}", a.command, a.result);
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    };
    tokio::select! {
        _ = tokio::time::timeout(budget, done) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping motors");
        }
    }
    link.stop_motors().await?;
    link.disconnect().await;
    Ok(())
}

async fn calibrate_cmd(cfg: &Config, kind: CalibrationKind) -> Result<()> {
    let link = open_link(cfg).await?;
    let mut events = link.subscribe();
    if let Err(e) = link.calibrate(kind).await {
        link.disconnect().await;
        return Err(e.into());
    }
    let interactive = kind.operator_steps() > 0;
    if interactive {
        println!("press Enter to confirm each step, 'c' + Enter to cancel");
    }
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = interactive;

    let outcome = loop {
        tokio::select! {
            ev = events.recv() => match ev {
                Ok(LinkEvent::Calibration(p)) => {
                    println!("[{:>3.0}%] {}", p.progress * 100.0, p.instruction);
                    if p.status != CalibrationStatus::Running {
                        break p.status;
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break CalibrationStatus::Failed("link closed".into()),
            },
            line = stdin.next_line(), if stdin_open => match line? {
                Some(l) if l.trim().eq_ignore_ascii_case("c") => {
                    if let Some(done) = cancel_unless_done(&link).await? {
                        break done;
                    }
                }
                Some(_) => { link.next_calibration_step().await?; }
                None => {
                    stdin_open = false;
                    if let Some(done) = cancel_unless_done(&link).await? {
                        break done;
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                if let Some(done) = cancel_unless_done(&link).await? {
                    break done;
                }
            }
        }
    };
    link.disconnect().await;
    match outcome {
        CalibrationStatus::Failed(why) => anyhow::bail!("{} calibration failed: {}", kind, why),
        _ => Ok(()),
    }
}

/// Status of a run that is no longer going.
fn finished_calibration(progress: Option<&CalibrationProgress>) -> Option<CalibrationStatus> {
    progress.map(|p| p.status.clone()).filter(|s| *s != CalibrationStatus::Running)
}

/// Cancels the calibration unless it has already ended; an ended run
/// comes back with its final status.
async fn cancel_unless_done(link: &LinkHandle) -> Result<Option<CalibrationStatus>> {
    if let Some(done) = link.with_vehicle(|v| finished_calibration(v.calibration.as_ref())) {
        return Ok(Some(done));
    }
    match link.cancel_calibration().await {
        Ok(()) => Ok(None),
        // finished between the check and the request
        Err(LinkError::Refused(_)) => Ok(Some(
            link.with_vehicle(|v| finished_calibration(v.calibration.as_ref()))
                .unwrap_or(CalibrationStatus::Succeeded),
        )),
        Err(e) => Err(e.into()),
    }
}

async fn sim_cmd(cfg: &Config) -> Result<()> {
    let sim_cfg = cfg.sim.clone().unwrap_or_default();
    let sim = gcs_sim::spawn(sim_cfg)?;
    info!("simulator running, Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    sim.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(status: CalibrationStatus) -> CalibrationProgress {
        CalibrationProgress { kind: CalibrationKind::Gyro, progress: 1.0, instruction: String::new(), status }
    }

    #[test]
    fn only_ended_runs_count_as_finished() {
        assert_eq!(finished_calibration(None), None);
        assert_eq!(finished_calibration(Some(&progress(CalibrationStatus::Running))), None);
        assert_eq!(
            finished_calibration(Some(&progress(CalibrationStatus::Succeeded))),
            Some(CalibrationStatus::Succeeded)
        );
        let failed = CalibrationStatus::Failed("cancelled".into());
        assert_eq!(finished_calibration(Some(&progress(failed.clone()))), Some(failed));
    }
}
