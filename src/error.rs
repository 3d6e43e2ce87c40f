use crate::session::Role;
use thiserror::Error;

/// Rejections issued by a session coordinator. None of these are fatal; the
/// coordinator answers the requesting client and keeps running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("role {0:?} is not allowed to apply this mutation")]
    RoleDenied(Role),
    #[error("client {0} has no membership in this session")]
    UnknownClient(u64),
    #[error("note {0} does not exist")]
    UnknownNote(u64),
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),
    #[error("session {0:?} already exists")]
    SessionExists(String),
    #[error("session coordinator is no longer running")]
    Closed,
}

/// Client-side sync failures. All of them have a local recovery path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("stale state update (applied revision {applied}, received {received})")]
    StaleRevision { applied: u64, received: u64 },
    #[error("lost connection to the session coordinator")]
    Disconnected,
}

/// Latency probe failures. Advisory only; callers fall back to the cached
/// estimate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,
    #[error("probe endpoint unreachable: {0}")]
    Endpoint(String),
}
