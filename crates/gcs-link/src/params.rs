//! Full parameter download with idle-timeout gap filling.

use gcs_proto::telemetry::ParamValue;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// MAVLink param ids are 16 bytes, NUL padded when shorter.
pub fn param_id_to_string(id: &[u8; 16]) -> String {
    id.iter().take_while(|&&c| c != 0).map(|&c| c as char).collect()
}

/// Names longer than 16 bytes are truncated.
pub fn param_id_from_str(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (dst, src) in out.iter_mut().zip(name.bytes()) {
        *dst = src;
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    RequestList,
    RequestIndices(Vec<u16>),
    Complete { received: usize, expected: usize },
}

#[derive(Debug, Clone)]
pub struct ParamSync {
    idle_timeout: Duration,
    max_retries: u32,
    active: bool,
    seen: Vec<bool>,
    received: usize,
    last_rx: Instant,
    rounds: u32,
}

impl ParamSync {
    pub fn new(idle_timeout: Duration, max_retries: u32, now: Instant) -> Self {
        Self {
            idle_timeout,
            max_retries,
            active: false,
            seen: Vec::new(),
            received: 0,
            last_rx: now,
            rounds: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// (received, expected); expected is 0 until the first PARAM_VALUE.
    pub fn progress(&self) -> (usize, usize) {
        (self.received, self.seen.len())
    }

    pub fn start(&mut self, now: Instant) -> SyncAction {
        self.active = true;
        self.seen.clear();
        self.received = 0;
        self.rounds = 0;
        self.last_rx = now;
        SyncAction::RequestList
    }

    pub fn cancel(&mut self) {
        self.active = false;
    }

    /// Returns Complete once every index has been seen.
    pub fn on_value(&mut self, v: &ParamValue, now: Instant) -> Option<SyncAction> {
        if !self.active {
            return None;
        }
        self.last_rx = now;
        if self.seen.len() != v.count as usize {
            if !self.seen.is_empty() {
                warn!("param count changed {} -> {}", self.seen.len(), v.count);
            }
            self.seen.resize(v.count as usize, false);
            self.received = self.seen.iter().filter(|s| **s).count();
        }
        // index u16::MAX is an unsolicited echo, not part of the list
        if let Some(slot) = self.seen.get_mut(v.index as usize) {
            if !*slot {
                *slot = true;
                self.received += 1;
            }
        }
        if !self.seen.is_empty() && self.received == self.seen.len() {
            return Some(self.finish());
        }
        None
    }

    pub fn tick(&mut self, now: Instant) -> Option<SyncAction> {
        if !self.active || now.saturating_duration_since(self.last_rx) < self.idle_timeout {
            return None;
        }
        if self.rounds >= self.max_retries {
            let (received, expected) = self.progress();
            warn!("param fetch incomplete: {}/{} after {} retries", received, expected, self.rounds);
            return Some(self.finish());
        }
        self.rounds += 1;
        self.last_rx = now;
        if self.seen.is_empty() {
            debug!("no PARAM_VALUE yet, re-requesting list (round {})", self.rounds);
            return Some(SyncAction::RequestList);
        }
        let missing = self.missing();
        info!("re-requesting {} missing params (round {})", missing.len(), self.rounds);
        Some(SyncAction::RequestIndices(missing))
    }

    pub fn missing(&self) -> Vec<u16> {
        self.seen
            .iter()
            .enumerate()
            .filter(|(_, s)| !**s)
            .map(|(i, _)| i as u16)
            .collect()
    }

    fn finish(&mut self) -> SyncAction {
        self.active = false;
        let (received, expected) = self.progress();
        SyncAction::Complete { received, expected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pv(index: u16, count: u16) -> ParamValue {
        ParamValue { name: format!("P{}", index), value: index as f32, index, count }
    }

    fn ms(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[test]
    fn param_id_conversions() {
        let id = param_id_from_str("ARMING_CHECK");
        assert_eq!(param_id_to_string(&id), "ARMING_CHECK");
        let long = param_id_from_str("ABCDEFGHIJKLMNOPQRS");
        assert_eq!(param_id_to_string(&long), "ABCDEFGHIJKLMNOP");
    }

    #[test]
    fn completes_when_all_seen() {
        let t0 = Instant::now();
        let mut s = ParamSync::new(Duration::from_secs(2), 3, t0);
        assert_eq!(s.start(t0), SyncAction::RequestList);
        assert_eq!(s.on_value(&pv(0, 3), ms(t0, 10)), None);
        assert_eq!(s.on_value(&pv(2, 3), ms(t0, 20)), None);
        // duplicates don't count twice
        assert_eq!(s.on_value(&pv(2, 3), ms(t0, 25)), None);
        assert_eq!(
            s.on_value(&pv(1, 3), ms(t0, 30)),
            Some(SyncAction::Complete { received: 3, expected: 3 })
        );
        assert!(!s.is_active());
    }

    #[test]
    fn idle_timeout_requests_missing() {
        let t0 = Instant::now();
        let mut s = ParamSync::new(Duration::from_secs(2), 3, t0);
        s.start(t0);
        s.on_value(&pv(0, 4), ms(t0, 100));
        s.on_value(&pv(3, 4), ms(t0, 200));
        assert_eq!(s.tick(ms(t0, 2100)), None);
        assert_eq!(s.tick(ms(t0, 2200)), Some(SyncAction::RequestIndices(vec![1, 2])));
        s.on_value(&pv(1, 4), ms(t0, 2300));
        assert_eq!(
            s.on_value(&pv(2, 4), ms(t0, 2400)),
            Some(SyncAction::Complete { received: 4, expected: 4 })
        );
    }

    #[test]
    fn gives_up_partial_after_retries() {
        let t0 = Instant::now();
        let mut s = ParamSync::new(Duration::from_secs(2), 2, t0);
        s.start(t0);
        s.on_value(&pv(0, 3), t0);
        assert_eq!(s.tick(ms(t0, 2000)), Some(SyncAction::RequestIndices(vec![1, 2])));
        assert_eq!(s.tick(ms(t0, 4000)), Some(SyncAction::RequestIndices(vec![1, 2])));
        assert_eq!(
            s.tick(ms(t0, 6000)),
            Some(SyncAction::Complete { received: 1, expected: 3 })
        );
        assert_eq!(s.tick(ms(t0, 9000)), None);
    }

    #[test]
    fn silent_vehicle_gets_list_again() {
        let t0 = Instant::now();
        let mut s = ParamSync::new(Duration::from_secs(2), 1, t0);
        s.start(t0);
        assert_eq!(s.tick(ms(t0, 2000)), Some(SyncAction::RequestList));
        assert_eq!(s.tick(ms(t0, 4000)), Some(SyncAction::Complete { received: 0, expected: 0 }));
    }

    #[test]
    fn echo_index_is_ignored() {
        let t0 = Instant::now();
        let mut s = ParamSync::new(Duration::from_secs(2), 3, t0);
        s.start(t0);
        s.on_value(&pv(0, 2), t0);
        assert_eq!(s.on_value(&pv(u16::MAX, 2), t0), None);
        assert_eq!(s.progress(), (1, 2));
    }

    #[test]
    fn inactive_ignores_values() {
        let t0 = Instant::now();
        let mut s = ParamSync::new(Duration::from_secs(2), 3, t0);
        assert_eq!(s.on_value(&pv(0, 1), t0), None);
        assert_eq!(s.tick(ms(t0, 5000)), None);
    }
}
