mod bus;
mod client;
mod estimator;
mod probe;

pub use bus::{SubscriberId, SyncEventBus};
pub use client::{ClientHandle, ClientSnapshot, SyncClient, SyncMetrics, spawn_client};
pub use estimator::{PositionAnchor, estimate_position};
pub use probe::{LatencyProbe, ProbeEndpoint};
