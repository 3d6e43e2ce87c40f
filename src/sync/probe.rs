use crate::error::ProbeError;
use crate::session::SessionHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// Anything the probe can round-trip against. Reachability is the whole
/// contract; there is no payload.
pub trait ProbeEndpoint {
    fn ping(&self, timeout: Duration) -> Result<(), ProbeError>;
}

impl ProbeEndpoint for SessionHandle {
    fn ping(&self, timeout: Duration) -> Result<(), ProbeError> {
        SessionHandle::ping(self, timeout)
    }
}

/// Measures round-trip time to the coordinator and keeps a one-way estimate
/// (half the RTT, assuming a symmetric path). Latency is advisory: a failed
/// probe keeps the previous estimate instead of failing the caller.
pub struct LatencyProbe {
    timeout: Duration,
    latency_ms: f64,
}

impl LatencyProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            latency_ms: 0.0,
        }
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency_ms
    }

    pub fn measure(&mut self, endpoint: &dyn ProbeEndpoint) -> f64 {
        let started = Instant::now();
        match endpoint.ping(self.timeout) {
            Ok(()) => {
                let round_trip_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.latency_ms = round_trip_ms / 2.0;
            }
            Err(error) => {
                debug!(%error, cached_ms = self.latency_ms, "latency probe failed, keeping cached estimate");
            }
        }
        self.latency_ms
    }
}
