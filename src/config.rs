use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for one sync engine instance.
///
/// Constructed explicitly and passed by reference; there is no process-wide
/// singleton, so several independent sessions can run in one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Divergence (in beats) above which a reconciliation hard-snaps the
    /// local extrapolation back onto the server's reported state.
    pub max_drift_beats: f64,
    /// How often a client reconciles against the coordinator, and how often
    /// the coordinator pushes state while playing.
    pub sync_interval_ms: u64,
    /// Cadence of the client tick loop driving the position estimator and
    /// note scheduler. Must stay under 100ms for a smooth playhead.
    pub frame_interval_ms: u64,
    /// When true, reconciliation extrapolates the server's reported position
    /// forward by the local elapsed time before measuring drift.
    pub latency_compensation: bool,
    /// Width of a note's start window, expressed as milliseconds of
    /// beat-time. Covers the gap between discrete ticks.
    pub trigger_tolerance_ms: f64,
    /// Upper bound on a latency probe round-trip.
    pub probe_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_drift_beats: 0.25,
            sync_interval_ms: 500,
            frame_interval_ms: 16,
            latency_compensation: true,
            trigger_tolerance_ms: 50.0,
            probe_timeout_ms: 3000,
        }
    }
}

impl SyncConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
