//! Heartbeat watchdog and bounded reconnect, driven by one timer tick.
//!
//! All time is passed in so the machine can be stepped deterministically.

use gcs_proto::link::LinkState;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Silence after which a connected link counts as lost.
    pub heartbeat_timeout: Duration,
    /// How long the first heartbeat may take after opening.
    pub connect_timeout: Duration,
    pub max_attempts: u32,
    /// Window given to each reconnect attempt.
    pub retry_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    /// First heartbeat after opening.
    Established,
    /// Heartbeat came back while reconnecting.
    Restored { attempts: u32 },
    /// Heartbeat went stale; attempt 1 starts now.
    Lost,
    /// Previous attempt window expired; this attempt starts now.
    Retry { attempt: u32 },
    GiveUp { reason: &'static str },
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    policy: ReconnectPolicy,
    state: LinkState,
    since: Instant,
    last_heartbeat: Option<Instant>,
}

impl Supervisor {
    pub fn new(policy: ReconnectPolicy, now: Instant) -> Self {
        Self { policy, state: LinkState::Disconnected, since: now, last_heartbeat: None }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    pub fn start(&mut self, now: Instant) {
        self.enter(LinkState::Connecting, now);
        self.last_heartbeat = None;
    }

    pub fn stop(&mut self, now: Instant) {
        self.enter(LinkState::Disconnected, now);
    }

    pub fn on_heartbeat(&mut self, now: Instant) -> Option<SupervisorAction> {
        match self.state {
            LinkState::Connecting => {
                self.last_heartbeat = Some(now);
                self.enter(LinkState::Connected, now);
                Some(SupervisorAction::Established)
            }
            LinkState::Reconnecting { attempt } => {
                self.last_heartbeat = Some(now);
                self.enter(LinkState::Connected, now);
                Some(SupervisorAction::Restored { attempts: attempt })
            }
            LinkState::Connected => {
                self.last_heartbeat = Some(now);
                None
            }
            // terminal until start() is called again
            LinkState::Disconnected | LinkState::Failed => None,
        }
    }

    /// The reader reported the transport gone. A connected link goes straight
    /// to reconnecting instead of waiting out the heartbeat timeout.
    pub fn on_transport_lost(&mut self, now: Instant) -> Option<SupervisorAction> {
        if self.state == LinkState::Connected {
            self.enter(LinkState::Reconnecting { attempt: 1 }, now);
            return Some(SupervisorAction::Lost);
        }
        None
    }

    pub fn tick(&mut self, now: Instant) -> Option<SupervisorAction> {
        let in_state = now.saturating_duration_since(self.since);
        match self.state {
            LinkState::Connecting if in_state >= self.policy.connect_timeout => {
                self.enter(LinkState::Failed, now);
                Some(SupervisorAction::GiveUp { reason: "no heartbeat within connect timeout" })
            }
            LinkState::Connected => {
                let silent = self
                    .last_heartbeat
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or(in_state);
                if silent >= self.policy.heartbeat_timeout {
                    self.enter(LinkState::Reconnecting { attempt: 1 }, now);
                    Some(SupervisorAction::Lost)
                } else {
                    None
                }
            }
            LinkState::Reconnecting { attempt } if in_state >= self.policy.retry_interval => {
                if attempt >= self.policy.max_attempts {
                    self.enter(LinkState::Failed, now);
                    Some(SupervisorAction::GiveUp { reason: "reconnect attempts exhausted" })
                } else {
                    let next = attempt + 1;
                    self.enter(LinkState::Reconnecting { attempt: next }, now);
                    Some(SupervisorAction::Retry { attempt: next })
                }
            }
            _ => None,
        }
    }

    fn enter(&mut self, state: LinkState, now: Instant) {
        self.state = state;
        self.since = now;
    }
}
