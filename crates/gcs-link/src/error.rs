use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid endpoint '{0}'")]
    Endpoint(String),
    #[error("open {endpoint}: {reason}")]
    Open { endpoint: String, reason: String },
    #[error("mavlink send: {0}")]
    Send(String),
    #[error("mavlink recv: {0}")]
    Recv(String),
    #[error("transport closed: {0}")]
    Closed(String),
    #[error("no heartbeat within {0:?}")]
    NoHeartbeat(std::time::Duration),
    #[error("not connected (state: {0})")]
    NotConnected(String),
    #[error("refused: {0}")]
    Refused(String),
    #[error("rate limited: {0}")]
    RateLimited(&'static str),
    #[error("unknown flight mode '{0}'")]
    UnknownMode(String),
    #[error("unknown parameter '{0}'")]
    UnknownParam(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("link task stopped")]
    Stopped,
}

impl LinkError {
    /// Receive errors after which the transport is still usable.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Recv(_))
    }
}
