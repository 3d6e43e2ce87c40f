use std::time::{Duration, Instant};

/// Pure position extrapolation: where the shared playhead is after `elapsed`
/// wall-clock time, given the last known beat and tempo. Frozen while not
/// playing.
pub fn estimate_position(
    last_known_beat: f64,
    tempo: f64,
    is_playing: bool,
    elapsed: Duration,
) -> f64 {
    if !is_playing {
        return last_known_beat;
    }
    last_known_beat + elapsed.as_secs_f64() * tempo / 60.0
}

/// A (beat, instant) pair the client extrapolates from between
/// reconciliations. Reading the position has no side effects, so it can be
/// queried every frame.
#[derive(Debug, Clone, Copy)]
pub struct PositionAnchor {
    pub beat: f64,
    pub tempo: f64,
    pub playing: bool,
    pub since: Instant,
}

impl PositionAnchor {
    pub fn new(beat: f64, tempo: f64, playing: bool) -> Self {
        Self {
            beat,
            tempo,
            playing,
            since: Instant::now(),
        }
    }

    pub fn position_at(&self, now: Instant) -> f64 {
        estimate_position(
            self.beat,
            self.tempo,
            self.playing,
            now.saturating_duration_since(self.since),
        )
    }

    pub fn position(&self) -> f64 {
        self.position_at(Instant::now())
    }
}
