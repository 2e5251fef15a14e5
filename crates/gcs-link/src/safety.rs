use gcs_proto::link::LinkState;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Arm,
    Disarm,
    SetMode,
    MotorTest,
    Calibration,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arm => "arm",
            Self::Disarm => "disarm",
            Self::SetMode => "set mode",
            Self::MotorTest => "motor test",
            Self::Calibration => "calibration",
        }
    }
}

/// Minimum spacing between two commands of the same kind.
#[derive(Debug)]
pub struct CommandRateLimit {
    last: HashMap<CommandKind, Instant>,
    min_interval: Duration,
}

impl CommandRateLimit {
    pub fn new(min_interval: Duration) -> Self {
        Self { last: HashMap::new(), min_interval }
    }

    pub fn allow(&mut self, kind: CommandKind, now: Instant) -> bool {
        if let Some(t) = self.last.get(&kind) {
            if now.saturating_duration_since(*t) < self.min_interval { return false; }
        }
        self.last.insert(kind, now);
        true
    }
}

/// Gate for outgoing vehicle commands.
#[derive(Debug)]
pub struct CommandGuard {
    require_heartbeat: bool,
    limiter: CommandRateLimit,
}

impl CommandGuard {
    pub fn new(require_heartbeat: bool, min_interval: Duration) -> Self {
        Self { require_heartbeat, limiter: CommandRateLimit::new(min_interval) }
    }

    pub fn check(
        &mut self,
        kind: CommandKind,
        state: LinkState,
        heartbeat_seen: bool,
        now: Instant,
    ) -> Result<(), LinkError> {
        let usable = match state {
            LinkState::Connected => true,
            // the transport is still open, just quiet
            LinkState::Reconnecting { .. } => !self.require_heartbeat,
            _ => false,
        };
        if !usable {
            return Err(LinkError::NotConnected(state.to_string()));
        }
        if self.require_heartbeat && !heartbeat_seen {
            return Err(LinkError::Refused(format!("{}: no heartbeat seen yet", kind.as_str())));
        }
        if !self.limiter.allow(kind, now) {
            return Err(LinkError::RateLimited(kind.as_str()));
        }
        Ok(())
    }
}
