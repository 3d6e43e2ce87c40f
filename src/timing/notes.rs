use serde::{Deserialize, Serialize};

pub type NoteId = u64;

/// One note of the shared composition, positioned in beats.
///
/// `start_beat` and `pitch` are never edited in place; an edit is modeled as
/// remove + add so the trigger scheduler stays idempotent across replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub pitch: u8,
    pub velocity: u8,
    pub start_beat: f64,
    pub duration_beats: f64,
}

impl Note {
    pub fn new(id: NoteId, pitch: u8, velocity: u8, start_beat: f64, duration_beats: f64) -> Self {
        Self {
            id,
            pitch,
            velocity,
            start_beat,
            duration_beats,
        }
    }

    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.duration_beats
    }
}
