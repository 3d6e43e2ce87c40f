use crate::config::SyncConfig;
use crate::error::{ProbeError, SessionError};
use crate::session::{AudioSyncState, ClientId, Mutation, Role, SessionId, TransportPhase};
use crate::timing::Note;
use crossbeam::channel::{Receiver, Sender, bounded, tick, unbounded};
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Pushed asynchronously to every joined client of a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(AudioSyncState),
    NotesChanged {
        state: AudioSyncState,
        notes: Vec<Note>,
    },
}

/// Reply to a successful join: the role the server resolved for this client
/// plus the current replica of the session.
#[derive(Debug, Clone)]
pub struct Welcome {
    pub role: Role,
    pub state: AudioSyncState,
    pub notes: Vec<Note>,
}

enum SessionCommand {
    Join {
        client_id: ClientId,
        events: Sender<SessionEvent>,
        reply: Sender<Result<Welcome, SessionError>>,
    },
    Leave {
        client_id: ClientId,
    },
    Invite {
        by: ClientId,
        client_id: ClientId,
        role: Role,
        reply: Sender<Result<(), SessionError>>,
    },
    Mutate {
        client_id: ClientId,
        mutation: Mutation,
        reply: Sender<Result<AudioSyncState, SessionError>>,
    },
    FetchState {
        reply: Sender<AudioSyncState>,
    },
    FetchNotes {
        reply: Sender<Vec<Note>>,
    },
    Ping {
        reply: Sender<()>,
    },
    ReportLatency {
        client_id: ClientId,
        latency_ms: f64,
    },
    Shutdown,
}

/// Cheap, cloneable handle to one session's coordinator thread. All calls
/// are serialized through the coordinator's single command loop.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub session_id: SessionId,
    command_tx: Sender<SessionCommand>,
}

impl SessionHandle {
    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> SessionCommand) -> Result<T, SessionError>
    where
        T: Send,
    {
        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx
            .send(build(reply_tx))
            .map_err(|_| SessionError::Closed)?;
        reply_rx.recv().map_err(|_| SessionError::Closed)
    }

    pub fn join(
        &self,
        client_id: ClientId,
        events: Sender<SessionEvent>,
    ) -> Result<Welcome, SessionError> {
        self.request(|reply| SessionCommand::Join {
            client_id,
            events,
            reply,
        })?
    }

    pub fn leave(&self, client_id: ClientId) {
        let _ = self.command_tx.send(SessionCommand::Leave { client_id });
    }

    /// Record a membership role for `client_id`. Only the host may invite.
    pub fn invite(
        &self,
        by: ClientId,
        client_id: ClientId,
        role: Role,
    ) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Invite {
            by,
            client_id,
            role,
            reply,
        })?
    }

    pub fn mutate(
        &self,
        client_id: ClientId,
        mutation: Mutation,
    ) -> Result<AudioSyncState, SessionError> {
        self.request(|reply| SessionCommand::Mutate {
            client_id,
            mutation,
            reply,
        })?
    }

    pub fn fetch_state(&self) -> Result<AudioSyncState, SessionError> {
        self.request(|reply| SessionCommand::FetchState { reply })
    }

    pub fn fetch_notes(&self) -> Result<Vec<Note>, SessionError> {
        self.request(|reply| SessionCommand::FetchNotes { reply })
    }

    /// Minimal round-trip used by the latency probe. Any reply within the
    /// timeout counts as reachable.
    pub fn ping(&self, timeout: Duration) -> Result<(), ProbeError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx
            .send(SessionCommand::Ping { reply: reply_tx })
            .map_err(|e| ProbeError::Endpoint(e.to_string()))?;
        reply_rx.recv_timeout(timeout).map_err(|_| ProbeError::Timeout)
    }

    /// Advisory, fire-and-forget.
    pub fn report_latency(&self, client_id: ClientId, latency_ms: f64) {
        let _ = self.command_tx.send(SessionCommand::ReportLatency {
            client_id,
            latency_ms,
        });
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(SessionCommand::Shutdown);
    }
}

/// Start one coordinator thread for `session_id` with `host` recorded as the
/// session host. The thread owns the authoritative state; everything else
/// talks to it through the returned handle.
pub fn spawn_session(session_id: SessionId, host: ClientId, config: &SyncConfig) -> SessionHandle {
    let (command_tx, command_rx) = unbounded();
    let push_interval = config.sync_interval();
    let id = session_id.clone();

    std::thread::spawn(move || {
        coordinator_thread(id, host, push_interval, command_rx);
    });

    SessionHandle {
        session_id,
        command_tx,
    }
}

struct Coordinator {
    session_id: SessionId,
    state: AudioSyncState,
    phase: TransportPhase,
    /// Local instant at which `state.playback_position` was true.
    anchor: Instant,
    notes: Vec<Note>,
    memberships: HashMap<ClientId, Role>,
    clients: HashMap<ClientId, Sender<SessionEvent>>,
}

fn coordinator_thread(
    session_id: SessionId,
    host: ClientId,
    push_interval: Duration,
    command_rx: Receiver<SessionCommand>,
) {
    let mut coordinator = Coordinator::new(session_id, host);
    let pusher = tick(push_interval);

    info!(session = %coordinator.session_id, host, "session coordinator started");

    loop {
        crossbeam::select! {
            recv(command_rx) -> msg => match msg {
                Ok(command) => {
                    if !coordinator.handle(command) {
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(pusher) -> _ => {
                // periodic push so clients can reconcile even without
                // host mutations
                if coordinator.phase == TransportPhase::Playing && !coordinator.clients.is_empty() {
                    coordinator.restamp();
                    coordinator.broadcast(SessionEvent::StateChanged(coordinator.state.clone()));
                }
            }
        }
    }

    info!(session = %coordinator.session_id, "session coordinator stopped");
}

impl Coordinator {
    fn new(session_id: SessionId, host: ClientId) -> Self {
        let mut memberships = HashMap::new();
        memberships.insert(host, Role::Host);
        Self {
            session_id,
            state: AudioSyncState::new(120.0),
            phase: TransportPhase::Stopped,
            anchor: Instant::now(),
            notes: Vec::new(),
            memberships,
            clients: HashMap::new(),
        }
    }

    /// Returns false when the coordinator should shut down.
    fn handle(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Join {
                client_id,
                events,
                reply,
            } => {
                // unknown members come in as viewers until the host says
                // otherwise
                let role = *self.memberships.entry(client_id).or_insert(Role::Viewer);
                self.clients.insert(client_id, events);
                debug!(session = %self.session_id, client = client_id, ?role, "client joined");
                let _ = reply.send(Ok(Welcome {
                    role,
                    state: self.snapshot(),
                    notes: self.notes.clone(),
                }));
            }
            SessionCommand::Leave { client_id } => {
                self.clients.remove(&client_id);
                debug!(session = %self.session_id, client = client_id, "client left");
            }
            SessionCommand::Invite {
                by,
                client_id,
                role,
                reply,
            } => {
                let _ = reply.send(self.invite(by, client_id, role));
            }
            SessionCommand::Mutate {
                client_id,
                mutation,
                reply,
            } => {
                let result = self.mutate(client_id, &mutation);
                if let Ok(ref state) = result {
                    let event = if mutation.is_transport() {
                        SessionEvent::StateChanged(state.clone())
                    } else {
                        SessionEvent::NotesChanged {
                            state: state.clone(),
                            notes: self.notes.clone(),
                        }
                    };
                    self.broadcast(event);
                }
                let _ = reply.send(result);
            }
            SessionCommand::FetchState { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::FetchNotes { reply } => {
                let _ = reply.send(self.notes.clone());
            }
            SessionCommand::Ping { reply } => {
                let _ = reply.send(());
            }
            SessionCommand::ReportLatency {
                client_id,
                latency_ms,
            } => {
                debug!(session = %self.session_id, client = client_id, latency_ms, "latency report");
                self.state.client_latency_ms = latency_ms;
            }
            SessionCommand::Shutdown => return false,
        }
        true
    }

    fn invite(&mut self, by: ClientId, client_id: ClientId, role: Role) -> Result<(), SessionError> {
        match self.memberships.get(&by) {
            Some(Role::Host) => {
                self.memberships.insert(client_id, role);
                Ok(())
            }
            Some(role) => Err(SessionError::RoleDenied(*role)),
            None => Err(SessionError::UnknownClient(by)),
        }
    }

    fn mutate(
        &mut self,
        client_id: ClientId,
        mutation: &Mutation,
    ) -> Result<AudioSyncState, SessionError> {
        let role = *self
            .memberships
            .get(&client_id)
            .ok_or(SessionError::UnknownClient(client_id))?;

        let allowed = if mutation.is_transport() {
            role.may_mutate_transport()
        } else {
            role.may_edit_notes()
        };
        if !allowed {
            warn!(
                session = %self.session_id,
                client = client_id,
                ?role,
                ?mutation,
                "mutation denied"
            );
            return Err(SessionError::RoleDenied(role));
        }

        self.validate(mutation)?;

        // fold the running position into the state before touching tempo or
        // transport, so clients re-anchor without a discontinuity
        self.restamp();

        match mutation {
            Mutation::SetTempo(bpm) => self.state.tempo = *bpm,
            Mutation::Play => {
                self.phase = TransportPhase::Playing;
                self.state.is_playing = true;
            }
            Mutation::Pause => {
                self.phase = TransportPhase::Paused;
                self.state.is_playing = false;
            }
            Mutation::Stop => {
                self.phase = TransportPhase::Stopped;
                self.state.is_playing = false;
                self.state.playback_position = 0.0;
            }
            Mutation::Seek(beat) => self.state.playback_position = *beat,
            Mutation::AddNote(note) => self.notes.push(note.clone()),
            Mutation::RemoveNote(id) => self.notes.retain(|n| n.id != *id),
        }

        debug!(session = %self.session_id, client = client_id, revision = self.state.revision, ?mutation, "mutation applied");
        Ok(self.state.clone())
    }

    fn validate(&self, mutation: &Mutation) -> Result<(), SessionError> {
        match mutation {
            Mutation::SetTempo(bpm) if !(bpm.is_finite() && *bpm > 0.0) => Err(
                SessionError::InvalidMutation(format!("tempo must be a positive bpm, got {bpm}")),
            ),
            Mutation::Pause if self.phase != TransportPhase::Playing => Err(
                SessionError::InvalidMutation("transport is not playing".into()),
            ),
            Mutation::Seek(beat) if !(beat.is_finite() && *beat >= 0.0) => Err(
                SessionError::InvalidMutation(format!("seek target must be >= 0 beats, got {beat}")),
            ),
            Mutation::AddNote(note) if !(note.duration_beats > 0.0) => Err(
                SessionError::InvalidMutation("note duration must be positive".into()),
            ),
            Mutation::AddNote(note) if !(note.start_beat >= 0.0) => Err(
                SessionError::InvalidMutation("note start must be >= 0 beats".into()),
            ),
            Mutation::AddNote(note) if self.notes.iter().any(|n| n.id == note.id) => Err(
                SessionError::InvalidMutation(format!("note {} already exists", note.id)),
            ),
            Mutation::RemoveNote(id) if !self.notes.iter().any(|n| n.id == *id) => {
                Err(SessionError::UnknownNote(*id))
            }
            _ => Ok(()),
        }
    }

    /// Advance the authoritative position to now, stamp a fresh timestamp
    /// and bump the revision. Position only moves while playing.
    fn restamp(&mut self) {
        let now = Instant::now();
        if self.state.is_playing {
            let elapsed = now.duration_since(self.anchor).as_secs_f64();
            self.state.playback_position += elapsed * self.state.tempo / 60.0;
        }
        self.anchor = now;
        self.state.server_timestamp_ms = epoch_ms();
        self.state.revision += 1;
    }

    /// Current state with the position advanced to now. Read-only: fetching
    /// never bumps the revision.
    fn snapshot(&self) -> AudioSyncState {
        let mut state = self.state.clone();
        if state.is_playing {
            let elapsed = self.anchor.elapsed().as_secs_f64();
            state.playback_position += elapsed * state.tempo / 60.0;
            state.server_timestamp_ms = epoch_ms();
        }
        state
    }

    fn broadcast(&mut self, event: SessionEvent) {
        let mut dead = Vec::new();
        for (client_id, events) in &self.clients {
            if events.send(event.clone()).is_err() {
                dead.push(*client_id);
            }
        }
        for client_id in dead {
            debug!(session = %self.session_id, client = client_id, "dropping disconnected client");
            self.clients.remove(&client_id);
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::Note;

    const HOST: ClientId = 1;
    const GUEST: ClientId = 2;

    fn session() -> SessionHandle {
        spawn_session("test".into(), HOST, &SyncConfig::default())
    }

    fn joined(handle: &SessionHandle, client: ClientId) -> (Welcome, Receiver<SessionEvent>) {
        let (tx, rx) = unbounded();
        let welcome = handle.join(client, tx).unwrap();
        (welcome, rx)
    }

    #[test]
    fn handle_is_debug_printable() {
        let handle = session();
        assert!(format!("{handle:?}").contains("SessionHandle"));
        handle.shutdown();
    }

    #[test]
    fn host_joins_with_host_role() {
        let handle = session();
        let (welcome, _rx) = joined(&handle, HOST);
        assert_eq!(welcome.role, Role::Host);
        assert_eq!(welcome.state.tempo, 120.0);
        assert!(!welcome.state.is_playing);
        handle.shutdown();
    }

    #[test]
    fn viewer_cannot_set_tempo_and_no_broadcast_is_sent() {
        let handle = session();
        let (_, host_rx) = joined(&handle, HOST);
        let (welcome, _guest_rx) = joined(&handle, GUEST);
        assert_eq!(welcome.role, Role::Viewer);

        let result = handle.mutate(GUEST, Mutation::SetTempo(140.0));
        assert_eq!(result, Err(SessionError::RoleDenied(Role::Viewer)));
        assert_eq!(handle.fetch_state().unwrap().tempo, 120.0);
        assert!(host_rx.try_recv().is_err());
        handle.shutdown();
    }

    #[test]
    fn collaborator_edits_notes_but_not_transport() {
        let handle = session();
        handle.invite(HOST, GUEST, Role::Collaborator).unwrap();
        let (welcome, _rx) = joined(&handle, GUEST);
        assert_eq!(welcome.role, Role::Collaborator);

        let note = Note::new(1, 60, 100, 0.0, 1.0);
        assert!(handle.mutate(GUEST, Mutation::AddNote(note)).is_ok());
        assert_eq!(handle.fetch_notes().unwrap().len(), 1);

        assert_eq!(
            handle.mutate(GUEST, Mutation::Play),
            Err(SessionError::RoleDenied(Role::Collaborator))
        );
        handle.shutdown();
    }

    #[test]
    fn only_host_may_invite() {
        let handle = session();
        handle.invite(HOST, GUEST, Role::Viewer).unwrap();
        assert_eq!(
            handle.invite(GUEST, 3, Role::Host),
            Err(SessionError::RoleDenied(Role::Viewer))
        );
        assert_eq!(
            handle.invite(99, 3, Role::Host),
            Err(SessionError::UnknownClient(99))
        );
        handle.shutdown();
    }

    #[test]
    fn transport_state_machine() {
        let handle = session();

        // stopped -> pause is not a legal transition
        assert!(matches!(
            handle.mutate(HOST, Mutation::Pause),
            Err(SessionError::InvalidMutation(_))
        ));

        let playing = handle.mutate(HOST, Mutation::Play).unwrap();
        assert!(playing.is_playing);

        std::thread::sleep(Duration::from_millis(100));
        let paused = handle.mutate(HOST, Mutation::Pause).unwrap();
        assert!(!paused.is_playing);
        // 100ms at 120bpm is about 0.2 beats
        assert!(paused.playback_position > 0.05);

        let stopped = handle.mutate(HOST, Mutation::Stop).unwrap();
        assert!(!stopped.is_playing);
        assert_eq!(stopped.playback_position, 0.0);
        handle.shutdown();
    }

    #[test]
    fn position_freezes_while_paused() {
        let handle = session();
        handle.mutate(HOST, Mutation::Play).unwrap();
        let paused = handle.mutate(HOST, Mutation::Pause).unwrap();

        std::thread::sleep(Duration::from_millis(80));
        let fetched = handle.fetch_state().unwrap();
        assert_eq!(fetched.playback_position, paused.playback_position);
        handle.shutdown();
    }

    #[test]
    fn revisions_increase_per_mutation() {
        let handle = session();
        let a = handle.mutate(HOST, Mutation::SetTempo(100.0)).unwrap();
        let b = handle.mutate(HOST, Mutation::SetTempo(110.0)).unwrap();
        let c = handle.mutate(HOST, Mutation::Play).unwrap();
        assert!(a.revision < b.revision);
        assert!(b.revision < c.revision);
        handle.shutdown();
    }

    #[test]
    fn mutations_are_validated() {
        let handle = session();
        assert!(matches!(
            handle.mutate(HOST, Mutation::SetTempo(0.0)),
            Err(SessionError::InvalidMutation(_))
        ));
        assert!(matches!(
            handle.mutate(HOST, Mutation::Seek(-1.0)),
            Err(SessionError::InvalidMutation(_))
        ));
        assert!(matches!(
            handle.mutate(HOST, Mutation::AddNote(Note::new(1, 60, 100, 0.0, 0.0))),
            Err(SessionError::InvalidMutation(_))
        ));
        assert_eq!(
            handle.mutate(HOST, Mutation::RemoveNote(42)),
            Err(SessionError::UnknownNote(42))
        );
        handle.shutdown();
    }

    #[test]
    fn rejected_mutation_does_not_bump_revision() {
        let handle = session();
        let before = handle.fetch_state().unwrap().revision;

        assert_eq!(
            handle.mutate(HOST, Mutation::RemoveNote(42)),
            Err(SessionError::UnknownNote(42))
        );
        assert!(matches!(
            handle.mutate(HOST, Mutation::SetTempo(-1.0)),
            Err(SessionError::InvalidMutation(_))
        ));
        assert_eq!(handle.fetch_state().unwrap().revision, before);
        handle.shutdown();
    }

    #[test]
    fn accepted_mutation_is_broadcast_to_clients() {
        let handle = session();
        handle.invite(HOST, GUEST, Role::Collaborator).unwrap();
        let (_, guest_rx) = joined(&handle, GUEST);

        handle.mutate(HOST, Mutation::SetTempo(90.0)).unwrap();
        match guest_rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            SessionEvent::StateChanged(state) => assert_eq!(state.tempo, 90.0),
            other => panic!("unexpected event {other:?}"),
        }

        let note = Note::new(5, 64, 90, 1.0, 0.5);
        handle.mutate(GUEST, Mutation::AddNote(note)).unwrap();
        match guest_rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            SessionEvent::NotesChanged { notes, .. } => assert_eq!(notes.len(), 1),
            other => panic!("unexpected event {other:?}"),
        }
        handle.shutdown();
    }

    #[test]
    fn handle_calls_fail_after_shutdown() {
        let handle = session();
        handle.shutdown();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.fetch_state(), Err(SessionError::Closed));
    }
}
