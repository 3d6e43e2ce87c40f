use jamsync::{
    Mutation, Note, NoteId, NoteSink, Role, SessionError, SessionRegistry, SyncConfig,
    spawn_client,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const HOST: u64 = 1;
const GUEST: u64 = 2;

#[derive(Clone, Default)]
struct CountingSink {
    ons: Arc<Mutex<Vec<NoteId>>>,
    offs: Arc<Mutex<Vec<NoteId>>>,
}

impl NoteSink for CountingSink {
    fn note_on(&mut self, note: &Note) {
        self.ons.lock().push(note.id);
    }

    fn note_off(&mut self, id: NoteId) {
        self.offs.lock().push(id);
    }

    fn all_off(&mut self) {}
}

fn test_config() -> SyncConfig {
    SyncConfig {
        sync_interval_ms: 100,
        // generous start window so a delayed frame tick cannot miss a note
        trigger_tolerance_ms: 150.0,
        ..SyncConfig::default()
    }
}

#[test]
fn notes_trigger_once_across_the_full_path() {
    let registry = SessionRegistry::new(test_config());
    let session = registry.create("triggering", HOST).unwrap();

    let note = Note::new(1, 60, 100, 0.25, 0.5);
    session.mutate(HOST, Mutation::AddNote(note)).unwrap();

    let sink = CountingSink::default();
    let client = spawn_client(session.clone(), HOST, test_config(), sink.clone()).unwrap();
    assert_eq!(client.role, Role::Host);

    session.mutate(HOST, Mutation::Play).unwrap();
    // at 120bpm the note window is 0.125s..0.375s into playback
    std::thread::sleep(Duration::from_millis(1200));

    assert_eq!(sink.ons.lock().as_slice(), &[1]);
    assert_eq!(sink.offs.lock().as_slice(), &[1]);

    session.mutate(HOST, Mutation::Stop).unwrap();
    std::thread::sleep(Duration::from_millis(300));
    let snapshot = client.snapshot();
    assert!(!snapshot.state.is_playing);
    assert_eq!(snapshot.state.playback_position, 0.0);

    client.shutdown();
    registry.remove("triggering");
}

#[test]
fn transport_mutations_are_rejected_for_viewers_end_to_end() {
    let registry = SessionRegistry::new(test_config());
    let session = registry.create("roles", HOST).unwrap();

    let viewer = spawn_client(session.clone(), GUEST, test_config(), CountingSink::default())
        .unwrap();
    assert_eq!(viewer.role, Role::Viewer);

    assert_eq!(
        session.mutate(GUEST, Mutation::SetTempo(140.0)),
        Err(SessionError::RoleDenied(Role::Viewer))
    );
    assert_eq!(session.fetch_state().unwrap().tempo, 120.0);

    std::thread::sleep(Duration::from_millis(300));
    // the rejected mutation never reached the viewer's replica either
    assert_eq!(viewer.snapshot().state.tempo, 120.0);

    viewer.shutdown();
    registry.remove("roles");
}

#[test]
fn committed_mutations_reach_every_replica() {
    let registry = SessionRegistry::new(test_config());
    let session = registry.create("broadcast", HOST).unwrap();
    session.invite(HOST, GUEST, Role::Collaborator).unwrap();

    let host_client =
        spawn_client(session.clone(), HOST, test_config(), CountingSink::default()).unwrap();
    let guest_client =
        spawn_client(session.clone(), GUEST, test_config(), CountingSink::default()).unwrap();

    session.mutate(HOST, Mutation::SetTempo(90.0)).unwrap();
    std::thread::sleep(Duration::from_millis(300));

    let host_snapshot = host_client.snapshot();
    let guest_snapshot = guest_client.snapshot();
    assert_eq!(host_snapshot.state.tempo, 90.0);
    assert_eq!(guest_snapshot.state.tempo, 90.0);
    assert_eq!(host_snapshot.state.revision, guest_snapshot.state.revision);

    host_client.shutdown();
    guest_client.shutdown();
    registry.remove("broadcast");
}

#[test]
fn reconciliations_fan_out_on_the_client_bus() {
    let registry = SessionRegistry::new(test_config());
    let session = registry.create("metrics", HOST).unwrap();

    let client = spawn_client(session.clone(), HOST, test_config(), CountingSink::default())
        .unwrap();
    let reconciles = Arc::new(AtomicUsize::new(0));
    let counter = reconciles.clone();
    client.bus().subscribe(move |state, metrics| {
        assert!(state.tempo > 0.0);
        assert!(metrics.drift_beats >= 0.0);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    session.mutate(HOST, Mutation::Play).unwrap();
    // several 100ms push/reconcile cycles
    std::thread::sleep(Duration::from_millis(500));

    assert!(reconciles.load(Ordering::SeqCst) >= 2);

    client.shutdown();
    registry.remove("metrics");
}
