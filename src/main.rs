use jamsync::{
    Mutation, Note, NoteId, NoteSink, Role, SessionError, SessionRegistry, SyncConfig,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stand-in synthesis layer for the demo: logs trigger decisions instead of
/// producing sound.
struct ConsoleSink {
    label: &'static str,
}

impl NoteSink for ConsoleSink {
    fn note_on(&mut self, note: &Note) {
        info!(client = self.label, pitch = note.pitch, beat = note.start_beat, "note on");
    }

    fn note_off(&mut self, id: NoteId) {
        info!(client = self.label, note = id, "note off");
    }

    fn all_off(&mut self) {
        info!(client = self.label, "all voices off");
    }
}

fn main() -> Result<(), SessionError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jamsync=info")),
        )
        .init();

    const HOST: u64 = 1;
    const GUEST: u64 = 2;

    let registry = SessionRegistry::new(SyncConfig::default());
    let session = registry.create("demo", HOST)?;
    session.invite(HOST, GUEST, Role::Collaborator)?;

    // a short two-bar figure
    for (id, pitch, start) in [(1, 60, 0.0), (2, 64, 1.0), (3, 67, 2.0), (4, 72, 3.0)] {
        session.mutate(HOST, Mutation::AddNote(Note::new(id, pitch, 100, start, 0.5)))?;
    }

    let host_client = jamsync::spawn_client(
        session.clone(),
        HOST,
        SyncConfig::default(),
        ConsoleSink { label: "host" },
    )?;
    let guest_client = jamsync::spawn_client(
        session.clone(),
        GUEST,
        SyncConfig::default(),
        ConsoleSink { label: "guest" },
    )?;

    session.mutate(HOST, Mutation::Play)?;
    std::thread::sleep(Duration::from_millis(2500));

    let snapshot = guest_client.snapshot();
    info!(
        position = snapshot.state.playback_position,
        drift = snapshot.metrics.drift_beats,
        latency_ms = snapshot.metrics.latency_ms,
        "guest replica before stop"
    );

    session.mutate(HOST, Mutation::Stop)?;
    std::thread::sleep(Duration::from_millis(100));

    host_client.shutdown();
    guest_client.shutdown();
    registry.remove("demo");
    Ok(())
}
