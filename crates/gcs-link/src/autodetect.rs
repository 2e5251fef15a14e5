use serde::Serialize;
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyS0".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![115200, 57600, 230400, 921600]
}

const V1_STX: u8 = 0xFE;
const V2_STX: u8 = 0xFD;

/// Finds a HEARTBEAT frame header (msg id 0) in raw bytes and returns the
/// sender's (system, component). Only the header is checked, not the CRC.
pub fn find_heartbeat_frame(buf: &[u8]) -> Option<(u8, u8)> {
    for (i, b) in buf.iter().enumerate() {
        match *b {
            // stx len seq sys comp msgid
            V1_STX => {
                if let Some(h) = buf.get(i..i + 6) {
                    if h[1] == 9 && h[5] == 0 {
                        return Some((h[3], h[4]));
                    }
                }
            }
            // stx len incompat compat seq sys comp msgid[3]
            V2_STX => {
                if let Some(h) = buf.get(i..i + 10) {
                    if h[1] > 0 && h[1] <= 9 && h[2] & !0x01 == 0 && h[7..10] == [0, 0, 0] {
                        return Some((h[5], h[6]));
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn probe(dev: &str, baud: u32, timeout: Duration) -> Result<Option<(u8, u8)>, String> {
    let mut port = tokio_serial::new(dev, baud)
        .timeout(Duration::from_millis(50))
        .open()
        .map_err(|e| format!("open failed: {}", e))?;

    let start = Instant::now();
    let mut window: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 256];
    while start.elapsed() < timeout {
        match port.read(&mut chunk) {
            Ok(0) => {}
            Ok(n) => {
                window.extend_from_slice(&chunk[..n]);
                if let Some(ids) = find_heartbeat_frame(&window) {
                    return Ok(Some(ids));
                }
                // keep a tail long enough for a split header
                if window.len() > 512 {
                    window.drain(..window.len() - 16);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(format!("read failed: {}", e)),
        }
    }
    Ok(None)
}

/// Tries every device × baud until one yields a heartbeat.
pub fn autodetect(
    candidate_devs: &[String],
    candidate_bauds: &[u32],
    probe_timeout: Duration,
) -> AutodetectResult {
    let mut probes = Vec::new();

    for dev in candidate_devs {
        for baud in candidate_bauds {
            let start = Instant::now();
            let outcome = probe(dev, *baud, probe_timeout);
            let elapsed_ms = start.elapsed().as_millis() as u64;
            match outcome {
                Ok(Some((sys, comp))) => {
                    probes.push(ProbeResult {
                        dev: dev.clone(),
                        baud: *baud,
                        hb_seen: true,
                        elapsed_ms,
                        note: format!("heartbeat from {}/{}", sys, comp),
                    });
                    info!("autodetect: OK {} @ {}", dev, baud);
                    return AutodetectResult { chosen: Some((dev.clone(), *baud)), probes };
                }
                Ok(None) => {
                    debug!("autodetect: no heartbeat on {} @ {}", dev, baud);
                    probes.push(ProbeResult {
                        dev: dev.clone(),
                        baud: *baud,
                        hb_seen: false,
                        elapsed_ms,
                        note: "no heartbeat".into(),
                    });
                }
                Err(note) => {
                    warn!("autodetect probe failed dev={} baud={} err={}", dev, baud, note);
                    probes.push(ProbeResult { dev: dev.clone(), baud: *baud, hb_seen: false, elapsed_ms, note });
                    // a device that won't open won't open at another baud either
                    break;
                }
            }
        }
    }

    AutodetectResult { chosen: None, probes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_v2_heartbeat() {
        let mut buf = vec![0x00, 0x13, 0x37];
        buf.extend_from_slice(&[V2_STX, 9, 0, 0, 42, 1, 1, 0, 0, 0]);
        buf.extend_from_slice(&[0; 11]);
        assert_eq!(find_heartbeat_frame(&buf), Some((1, 1)));
    }

    #[test]
    fn finds_v1_heartbeat() {
        let buf = [0xAA, V1_STX, 9, 7, 3, 190, 0, 1, 2];
        assert_eq!(find_heartbeat_frame(&buf), Some((3, 190)));
    }

    #[test]
    fn ignores_other_messages_and_truncation() {
        // ATTITUDE (msg 30)
        let attitude = [V2_STX, 28, 0, 0, 1, 1, 1, 30, 0, 0];
        assert_eq!(find_heartbeat_frame(&attitude), None);
        // header cut short
        let short = [V2_STX, 9, 0, 0, 1];
        assert_eq!(find_heartbeat_frame(&short), None);
        assert_eq!(find_heartbeat_frame(&[]), None);
    }

    #[test]
    fn missing_devices_are_reported() {
        let res = autodetect(
            &["/dev/does-not-exist-gcs".to_string()],
            &[57600, 115200],
            Duration::from_millis(10),
        );
        assert!(res.chosen.is_none());
        assert_eq!(res.probes.len(), 1);
        assert!(!res.probes[0].hb_seen);
    }
}
