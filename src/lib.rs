pub mod config;
pub mod error;
pub mod session;
pub mod sync;
pub mod timing;

pub use config::SyncConfig;
pub use error::{ProbeError, SessionError, SyncError};
pub use session::{
    AudioSyncState, ClientId, Mutation, Role, SessionEvent, SessionHandle, SessionId,
    SessionRegistry, TransportPhase, Welcome, spawn_session,
};
pub use sync::{
    ClientHandle, ClientSnapshot, LatencyProbe, PositionAnchor, ProbeEndpoint, SubscriberId,
    SyncClient, SyncEventBus, SyncMetrics, estimate_position, spawn_client,
};
pub use timing::{Note, NoteId, NoteSink, NoteTriggerScheduler};
