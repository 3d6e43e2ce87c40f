use crate::config::SyncConfig;
use crate::error::{SessionError, SyncError};
use crate::session::{AudioSyncState, ClientId, Role, SessionEvent, SessionHandle, Welcome};
use crate::sync::bus::SyncEventBus;
use crate::sync::estimator::PositionAnchor;
use crate::sync::probe::LatencyProbe;
use crate::timing::{NoteSink, NoteTriggerScheduler};
use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender, tick, unbounded};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Outcome of one reconciliation. Ephemeral; consumed by UI and diagnostics
/// through the event bus, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncMetrics {
    pub latency_ms: f64,
    /// Absolute divergence between the locally expected and the reported
    /// position, in beats.
    pub drift_beats: f64,
    pub correction_applied: bool,
    pub last_sync: Instant,
}

/// Freshest authoritative state and reconciliation metrics, readable
/// lock-free from a render loop.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    pub state: AudioSyncState,
    pub metrics: SyncMetrics,
}

impl ClientSnapshot {
    fn initial() -> Self {
        Self {
            state: AudioSyncState::new(120.0),
            metrics: SyncMetrics {
                latency_ms: 0.0,
                drift_beats: 0.0,
                correction_applied: false,
                last_sync: Instant::now(),
            },
        }
    }
}

/// One client's view of the shared timeline: a cached copy of the
/// authoritative state, a local extrapolation anchor, and the drift
/// detector that keeps the two honest.
pub struct SyncClient {
    config: SyncConfig,
    state: AudioSyncState,
    anchor: PositionAnchor,
    last_revision: Option<u64>,
    last_reconcile: Instant,
    latency_ms: f64,
    bus: Arc<SyncEventBus>,
    snapshot: Arc<ArcSwap<ClientSnapshot>>,
}

impl SyncClient {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            state: AudioSyncState::new(120.0),
            anchor: PositionAnchor::new(0.0, 120.0, false),
            last_revision: None,
            last_reconcile: Instant::now(),
            latency_ms: 0.0,
            bus: Arc::new(SyncEventBus::new()),
            snapshot: Arc::new(ArcSwap::from_pointee(ClientSnapshot::initial())),
        }
    }

    pub fn bus_handle(&self) -> Arc<SyncEventBus> {
        self.bus.clone()
    }

    pub fn snapshot_cell(&self) -> Arc<ArcSwap<ClientSnapshot>> {
        self.snapshot.clone()
    }

    pub fn set_latency_ms(&mut self, latency_ms: f64) {
        self.latency_ms = latency_ms;
    }

    pub fn position(&self) -> f64 {
        self.anchor.position()
    }

    pub fn position_at(&self, now: Instant) -> f64 {
        self.anchor.position_at(now)
    }

    pub fn tempo(&self) -> f64 {
        self.anchor.tempo
    }

    pub fn is_playing(&self) -> bool {
        self.anchor.playing
    }

    /// Apply an incoming authoritative state: discard it if stale, otherwise
    /// reconcile against it and re-anchor the local extrapolation.
    pub fn apply_update(&mut self, server: AudioSyncState) -> Result<SyncMetrics, SyncError> {
        if let Some(applied) = self.last_revision {
            if server.revision <= applied {
                debug!(
                    applied,
                    received = server.revision,
                    "discarding stale state update"
                );
                return Err(SyncError::StaleRevision {
                    applied,
                    received: server.revision,
                });
            }
        }

        let now = Instant::now();
        let metrics = self.reconcile_at(now, &server);

        // Hard snap, no gradual slew. Besides a threshold breach, any state
        // the extrapolation cannot continue through (first update, tempo or
        // transport change, seek) re-anchors too.
        let local = self.anchor.position_at(now);
        let discontinuity =
            (server.playback_position - local).abs() > self.config.max_drift_beats;
        if metrics.correction_applied
            || self.last_revision.is_none()
            || server.tempo != self.state.tempo
            || server.is_playing != self.state.is_playing
            || discontinuity
        {
            self.anchor = PositionAnchor {
                beat: server.playback_position,
                tempo: server.tempo,
                playing: server.is_playing,
                since: now,
            };
        }

        self.last_revision = Some(server.revision);
        self.state = server;
        self.snapshot.store(Arc::new(ClientSnapshot {
            state: self.state.clone(),
            metrics,
        }));
        Ok(metrics)
    }

    /// Drift detection against a reported state, with an injectable clock.
    /// Publishes the resulting metrics to every bus subscriber.
    pub fn reconcile_at(&mut self, now: Instant, server: &AudioSyncState) -> SyncMetrics {
        let elapsed = now
            .saturating_duration_since(self.last_reconcile)
            .as_secs_f64();

        // While paused no advance is expected, so drift must not accumulate
        // no matter how long ago the previous reconciliation was.
        let expected_advance = if server.is_playing {
            elapsed * server.tempo / 60.0
        } else {
            0.0
        };
        let expected_position = if self.config.latency_compensation {
            server.playback_position + expected_advance
        } else {
            server.playback_position
        };
        let drift_beats = (expected_position - server.playback_position).abs();
        let correction_applied = drift_beats > self.config.max_drift_beats && server.is_playing;

        let metrics = SyncMetrics {
            latency_ms: self.latency_ms,
            drift_beats,
            correction_applied,
            last_sync: now,
        };
        self.last_reconcile = now;

        if correction_applied {
            debug!(drift_beats, "drift above threshold, snapping to server position");
        }
        self.bus.publish(server, &metrics);
        metrics
    }
}

/// Control handle for a running client actor.
pub struct ClientHandle {
    pub client_id: ClientId,
    pub role: Role,
    shutdown_tx: Sender<()>,
    snapshot: Arc<ArcSwap<ClientSnapshot>>,
    bus: Arc<SyncEventBus>,
}

impl ClientHandle {
    pub fn snapshot(&self) -> Arc<ClientSnapshot> {
        self.snapshot.load_full()
    }

    pub fn bus(&self) -> &SyncEventBus {
        &self.bus
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Join `session` and run the client loop on its own thread: estimator and
/// note scheduler on a frame tick, reconciliation and latency probing on the
/// sync tick, pushed updates as they arrive.
pub fn spawn_client<S>(
    session: SessionHandle,
    client_id: ClientId,
    config: SyncConfig,
    sink: S,
) -> Result<ClientHandle, SessionError>
where
    S: NoteSink + Send + 'static,
{
    let (event_tx, event_rx) = unbounded();
    let welcome = session.join(client_id, event_tx)?;
    let role = welcome.role;

    let client = SyncClient::new(config.clone());
    let snapshot = client.snapshot_cell();
    let bus = client.bus_handle();
    let (shutdown_tx, shutdown_rx) = unbounded();

    std::thread::spawn(move || {
        client_thread(session, client_id, config, client, welcome, event_rx, shutdown_rx, sink);
    });

    Ok(ClientHandle {
        client_id,
        role,
        shutdown_tx,
        snapshot,
        bus,
    })
}

/// Result of one probe + fetch cycle, produced off-thread so a slow or
/// wedged coordinator never stalls the frame loop.
struct ResyncUpdate {
    latency_ms: f64,
    state: Option<AudioSyncState>,
}

/// Periodic probe + reconcile fetch, run on its own thread. Blocking here
/// is fine; the frame loop only ever sees the finished result.
fn resync_thread(
    session: SessionHandle,
    client_id: ClientId,
    config: SyncConfig,
    updates: Sender<ResyncUpdate>,
    stop: Receiver<()>,
) {
    let mut probe = LatencyProbe::new(config.probe_timeout());
    let ticker = tick(config.sync_interval());

    loop {
        crossbeam::select! {
            recv(ticker) -> _ => {
                let latency_ms = probe.measure(&session);
                session.report_latency(client_id, latency_ms);
                let state = match session.fetch_state() {
                    Ok(state) => Some(state),
                    Err(_) => {
                        debug!(client = client_id, "reconcile fetch failed, keeping local extrapolation");
                        None
                    }
                };
                if updates.send(ResyncUpdate { latency_ms, state }).is_err() {
                    break;
                }
            },
            recv(stop) -> _ => break,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn client_thread<S>(
    session: SessionHandle,
    client_id: ClientId,
    config: SyncConfig,
    mut client: SyncClient,
    welcome: Welcome,
    event_rx: Receiver<SessionEvent>,
    shutdown_rx: Receiver<()>,
    mut sink: S,
) where
    S: NoteSink,
{
    let mut notes = welcome.notes;
    let mut scheduler = NoteTriggerScheduler::new(config.trigger_tolerance_ms);
    let frame = tick(config.frame_interval());

    // dropping `stop_tx` on exit is what winds the worker down
    let (resync_tx, resync_rx) = unbounded();
    let (stop_tx, stop_rx) = unbounded::<()>();
    {
        let session = session.clone();
        let config = config.clone();
        std::thread::spawn(move || {
            resync_thread(session, client_id, config, resync_tx, stop_rx);
        });
    }

    let _ = client.apply_update(welcome.state);
    info!(client = client_id, session = %session.session_id, "sync client started");

    loop {
        crossbeam::select! {
            recv(event_rx) -> event => match event {
                Ok(SessionEvent::StateChanged(state)) => {
                    apply_pushed_state(&mut client, &mut scheduler, &mut sink, state);
                }
                Ok(SessionEvent::NotesChanged { state, notes: updated }) => {
                    notes = updated;
                    apply_pushed_state(&mut client, &mut scheduler, &mut sink, state);
                }
                Err(_) => {
                    info!(client = client_id, "session channel closed, stopping sync client");
                    break;
                }
            },
            recv(frame) -> _ => {
                let position = client.position();
                scheduler.tick(position, client.tempo(), &notes, &mut sink);
            },
            recv(resync_rx) -> update => match update {
                Ok(update) => {
                    client.set_latency_ms(update.latency_ms);
                    if let Some(state) = update.state {
                        // a fetch that lost the race against a push comes
                        // back stale; discarding it is the normal path
                        let _ = client.apply_update(state);
                    }
                }
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => break,
        }
    }

    drop(stop_tx);
    scheduler.reset(&mut sink);
    session.leave(client_id);
    info!(client = client_id, "sync client stopped");
}

fn apply_pushed_state(
    client: &mut SyncClient,
    scheduler: &mut NoteTriggerScheduler,
    sink: &mut dyn NoteSink,
    state: AudioSyncState,
) {
    let stopped = !state.is_playing && state.playback_position == 0.0;
    if client.apply_update(state).is_ok() && stopped {
        scheduler.reset(sink);
    }
}
