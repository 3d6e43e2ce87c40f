mod coordinator;
mod registry;
mod state;

pub use coordinator::{SessionEvent, SessionHandle, Welcome, spawn_session};
pub use registry::SessionRegistry;
pub use state::{AudioSyncState, ClientId, Mutation, Role, SessionId, TransportPhase};
