use serde::{Deserialize, Serialize};
use std::fmt;

/// Session lifecycle as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted or initial heartbeat never arrived.
    Failed,
}

impl LinkState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Connecting or reconnecting: a transport is open but liveness is unproven.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            Self::Failed => f.write_str("failed"),
        }
    }
}
