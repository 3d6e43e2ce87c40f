use super::{Note, NoteId};
use std::collections::HashMap;
use tracing::debug;

/// Boundary to whatever produces sound. The scheduler decides *when*, the
/// sink decides *how*.
pub trait NoteSink {
    fn note_on(&mut self, note: &Note);
    fn note_off(&mut self, id: NoteId);
    /// Silence every sounding voice immediately. No fade is required here;
    /// that is a synthesis concern.
    fn all_off(&mut self);
}

/// Fires each note exactly once per forward pass through its start window
/// and re-arms it once its end boundary is crossed.
///
/// Ticks are discrete (frame cadence, ~16ms), so a note's exact start
/// instant usually falls between two ticks. The start window
/// `[start_beat, start_beat + tolerance)` absorbs that gap.
pub struct NoteTriggerScheduler {
    /// Sounding notes, keyed by id with the start beat they were triggered
    /// at. Edits are remove + add, so a re-added id with a different start
    /// is a different note and must re-arm.
    played: HashMap<NoteId, f64>,
    last_position: f64,
    tolerance_ms: f64,
}

impl NoteTriggerScheduler {
    pub fn new(tolerance_ms: f64) -> Self {
        Self {
            played: HashMap::new(),
            last_position: 0.0,
            tolerance_ms,
        }
    }

    fn tolerance_beats(&self, tempo: f64) -> f64 {
        tempo / 60.0 * (self.tolerance_ms / 1000.0)
    }

    /// Advance to `position` (in beats) and fire/release notes accordingly.
    ///
    /// A backward jump (seek, transport stop, clock anomaly) conservatively
    /// clears the whole triggered set and silences all voices rather than
    /// tracking which windows moved ahead of the new position.
    pub fn tick(&mut self, position: f64, tempo: f64, notes: &[Note], sink: &mut dyn NoteSink) {
        if position < self.last_position {
            debug!(
                from = self.last_position,
                to = position,
                "position moved backward, re-arming all notes"
            );
            self.played.clear();
            sink.all_off();
        }

        // release triggered entries whose note no longer exists in the list
        // (or was re-added at a different start, which is a different note)
        self.played.retain(|id, start| {
            let known = notes
                .iter()
                .any(|n| n.id == *id && n.start_beat == *start);
            if !known {
                sink.note_off(*id);
            }
            known
        });

        let tolerance = self.tolerance_beats(tempo);
        for note in notes {
            if position >= note.start_beat
                && position < note.start_beat + tolerance
                && !self.played.contains_key(&note.id)
            {
                self.played.insert(note.id, note.start_beat);
                sink.note_on(note);
            }
        }

        for note in notes {
            if position > note.end_beat() && self.played.contains_key(&note.id) {
                self.played.remove(&note.id);
                sink.note_off(note.id);
            }
        }

        self.last_position = position;
    }

    /// Transport stop or restart-from-zero: drop every triggered flag and
    /// silence the sink.
    pub fn reset(&mut self, sink: &mut dyn NoteSink) {
        self.played.clear();
        self.last_position = 0.0;
        sink.all_off();
    }

    pub fn sounding(&self) -> usize {
        self.played.len()
    }
}
