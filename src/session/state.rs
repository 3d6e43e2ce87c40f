use crate::timing::{Note, NoteId};
use serde::{Deserialize, Serialize};

pub type SessionId = String;
pub type ClientId = u64;

/// Authoritative playback state, owned by the session coordinator and
/// replicated read-only to every client.
///
/// `revision` increases with every stamped state, so a client receiving
/// updates over an unordered transport can discard stale ones instead of
/// regressing its playhead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSyncState {
    pub revision: u64,
    /// Server wall-clock (ms since epoch) at which `playback_position` was
    /// true.
    pub server_timestamp_ms: u64,
    /// Beats elapsed since transport start.
    pub playback_position: f64,
    pub is_playing: bool,
    /// Beats per minute, always positive.
    pub tempo: f64,
    /// Last one-way latency reported by a client. Advisory only.
    pub client_latency_ms: f64,
}

impl AudioSyncState {
    pub fn new(tempo: f64) -> Self {
        Self {
            revision: 0,
            server_timestamp_ms: 0,
            playback_position: 0.0,
            is_playing: false,
            tempo,
            client_latency_ms: 0.0,
        }
    }
}

/// Server-side role of a session member. Resolved against the session's
/// membership records, never taken from a client-asserted flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Host,
    Collaborator,
    Viewer,
}

impl Role {
    pub fn may_mutate_transport(&self) -> bool {
        matches!(self, Role::Host)
    }

    pub fn may_edit_notes(&self) -> bool {
        !matches!(self, Role::Viewer)
    }
}

/// Per-session transport phase. `Stopped` and `Paused` both freeze the
/// position; only `Stopped` resets it to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportPhase {
    Stopped,
    Playing,
    Paused,
}

/// A state change requested by a client, applied (or rejected) by the
/// coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Mutation {
    SetTempo(f64),
    Play,
    Pause,
    Stop,
    Seek(f64),
    AddNote(Note),
    RemoveNote(NoteId),
}

impl Mutation {
    pub fn is_transport(&self) -> bool {
        !matches!(self, Mutation::AddNote(_) | Mutation::RemoveNote(_))
    }
}
