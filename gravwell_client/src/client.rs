//! Client implementation.
//!
//! The client maintains:
//! - A transport publishing connection events and snapshots on one channel
//! - Authoritative and predicted state timelines
//! - A command log replayed on every fresh snapshot
//! - Snapshot history for interpolation
//! - Per-tick command generation from sampled input
//!
//! Everything runs on one task. Ticks, frames, network events and
//! reconnect timers are interleaved by a single `select!`, so each owned
//! structure has exactly one writer at a time without locking. Connect
//! attempts run in the background and report back as events.

use std::{sync::Arc, time::Duration};

use gravwell_shared::{
    config::ClientConfig,
    physics::{ShipPhysics, Simulator},
    render::{RenderFrame, RenderSink},
    state::{Command, GameState, Snapshot},
};
use tokio::{
    sync::{mpsc, watch, Notify},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    command_log::CommandLog,
    input::{InputSource, InputState},
    interp::InterpolationEngine,
    prediction::PredictionEngine,
    reconciliation::{ReconcileOutcome, ReconciliationEngine},
    schedule::{ClientClock, Due, Scheduler},
    state_manager::StateManager,
    transport::{NetEvent, TcpTransport, Transport, TransportError},
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Never asked to connect.
    Idle,
    /// Connecting to server.
    Connecting,
    Connected,
    /// Link lost; predicting on stale state until reconnected.
    Disconnected,
    /// Shut down. Terminal.
    Stopped,
}

/// Running counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClientStats {
    pub snapshots_applied: u64,
    pub snapshots_stale: u64,
    pub commands_predicted: u64,
    pub commands_replayed: u64,
    /// Inbound frames dropped as undecodable.
    pub snapshots_malformed: u64,
    /// Commands evicted from a full log before acknowledgement.
    pub log_overflows: u64,
    pub reconnect_attempts: u64,
    /// Ship displacement caused by the most recent reconciliation.
    pub last_correction: f32,
}

/// Stops a running client from anywhere. Cloneable and idempotent.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// High-level game client.
pub struct GameClient<T: Transport> {
    pub cfg: ClientConfig,
    pub state: ClientState,

    transport: T,
    events: mpsc::Receiver<NetEvent>,
    events_open: bool,

    states: StateManager,
    log: CommandLog,
    prediction: PredictionEngine,
    reconciliation: ReconciliationEngine,
    interp: InterpolationEngine,

    clock: ClientClock,
    stats: ClientStats,

    reconnect_attempt: u32,
    reconnect_at: Option<Instant>,
    /// A link was lost; the next `Connected` starts a fresh session.
    session_lost: bool,
    /// The next applied snapshot rebases the timeline without replay.
    resync_pending: bool,

    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    status_requests: Arc<Notify>,
}

impl GameClient<TcpTransport> {
    /// Builds a client on the TCP transport. Does not connect.
    pub fn with_tcp(cfg: ClientConfig) -> Self {
        let (transport, events) = TcpTransport::new(cfg.connect_timeout(), cfg.outbound_queue);
        Self::new(cfg, transport, events)
    }
}

impl<T: Transport> GameClient<T> {
    pub fn new(cfg: ClientConfig, transport: T, events: mpsc::Receiver<NetEvent>) -> Self {
        let sim: Arc<dyn Simulator> = Arc::new(ShipPhysics::new(cfg.physics));
        let dt = cfg.dt_sec();
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            state: ClientState::Idle,
            transport,
            events,
            events_open: true,
            states: StateManager::default(),
            log: CommandLog::new(cfg.command_log_capacity),
            prediction: PredictionEngine::new(sim.clone(), dt),
            reconciliation: ReconciliationEngine::new(sim, dt),
            interp: InterpolationEngine::new(cfg.interp_capacity, cfg.render_delay()),
            clock: ClientClock::new(),
            stats: ClientStats::default(),
            reconnect_attempt: 0,
            reconnect_at: None,
            session_lost: false,
            resync_pending: false,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            status_requests: Arc::new(Notify::new()),
            cfg,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Notifying this makes a running client log [`GameClient::status_lines`].
    pub fn status_requests(&self) -> Arc<Notify> {
        self.status_requests.clone()
    }

    /// Connects to the configured endpoint. On failure a reconnect is
    /// scheduled according to the policy.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.state == ClientState::Stopped {
            return Err(TransportError::NotConnected);
        }
        self.state = ClientState::Connecting;
        let url = self.cfg.server_url.clone();
        match self.transport.connect(&url).await {
            Ok(()) => {
                self.state = ClientState::Connected;
                self.reconnect_attempt = 0;
                self.reconnect_at = None;
                Ok(())
            }
            Err(e) => {
                self.state = ClientState::Disconnected;
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Starts a connect attempt without waiting for it. The outcome is
    /// handled by [`GameClient::handle_event`].
    pub fn begin_connect(&mut self) {
        if self.state == ClientState::Stopped {
            return;
        }
        self.state = ClientState::Connecting;
        let url = self.cfg.server_url.clone();
        self.transport.start_connect(&url);
    }

    /// Advances one client tick. Input that is idle after clamping neither
    /// predicts nor sends.
    pub fn tick(&mut self, input: InputState) -> Option<Command> {
        let input = input.sanitized();
        if self.state == ClientState::Stopped || input.is_idle() {
            return None;
        }
        let command = self
            .prediction
            .predict(input, &mut self.states, &mut self.log);
        self.stats.commands_predicted += 1;
        self.transport.send_input(&command);
        Some(command)
    }

    pub fn handle_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Connected { peer } => {
                debug!(%peer, "Link up");
                if self.state == ClientState::Stopped {
                    return;
                }
                self.state = ClientState::Connected;
                self.reconnect_attempt = 0;
                self.reconnect_at = None;
                if self.session_lost {
                    self.start_session();
                }
            }
            NetEvent::Disconnected { reason } => {
                if self.state == ClientState::Stopped {
                    return;
                }
                warn!(reason = %reason, "Lost connection; continuing on predicted state");
                self.state = ClientState::Disconnected;
                self.session_lost = true;
                self.schedule_reconnect();
            }
            NetEvent::Snapshot(snapshot) => {
                let now = self.clock.now();
                self.on_snapshot(&snapshot, now);
            }
            NetEvent::Error(e) => {
                warn!(error = %e, "Transport error");
                if self.state == ClientState::Connecting && e.is_connect_failure() {
                    self.state = ClientState::Disconnected;
                    self.schedule_reconnect();
                }
            }
        }
    }

    /// The server may have restarted with its tick counter from zero, so
    /// nothing from the previous link is kept as a staleness reference.
    fn start_session(&mut self) {
        info!(
            held = ?self.states.authoritative_tick(),
            unacked = self.log.len(),
            "Reconnected; resynchronizing with server"
        );
        self.session_lost = false;
        self.states.reset_authoritative();
        self.interp.clear();
        self.log.clear();
        self.resync_pending = true;
    }

    /// Waits up to `timeout` for one transport event and applies it.
    /// For callers driving the client without [`GameClient::run`].
    pub async fn poll_event(&mut self, timeout: Duration) -> Option<NetEvent> {
        let event = tokio::time::timeout(timeout, self.events.recv())
            .await
            .ok()
            .flatten()?;
        self.handle_event(event.clone());
        Some(event)
    }

    /// Applies a snapshot received at `received_at` client time.
    pub fn on_snapshot(&mut self, snapshot: &Snapshot, received_at: Duration) -> ReconcileOutcome {
        if let Some(held) = self.states.authoritative_tick() {
            if snapshot.tick <= held {
                self.stats.snapshots_stale += 1;
                debug!(tick = snapshot.tick, held, "Stale snapshot dropped");
                return ReconcileOutcome::Stale {
                    tick: snapshot.tick,
                    held,
                };
            }
        }

        if self.resync_pending {
            // Commands predicted since reconnecting carry the old
            // session's ticks and cannot be replayed onto this one.
            self.log.clear();
            self.resync_pending = false;
        }

        self.interp.add_snapshot(snapshot, received_at);
        let outcome = self
            .reconciliation
            .reconcile(snapshot, &mut self.states, &mut self.log);

        if let ReconcileOutcome::Applied {
            replayed,
            correction,
            ..
        } = outcome
        {
            self.stats.snapshots_applied += 1;
            self.stats.commands_replayed += replayed as u64;
            self.stats.last_correction = correction;
            if snapshot.done {
                info!(tick = snapshot.tick, win = snapshot.win, "Game over");
            }
        }
        outcome
    }

    /// Interpolated authoritative state for a frame at `render_time`.
    pub fn sample_remote(&self, render_time: Duration) -> Option<GameState> {
        self.interp.sample(render_time)
    }

    /// Hands one frame to the renderer.
    pub fn render(&self, sink: &mut dyn RenderSink, render_time: Duration) {
        let remote = self.sample_remote(render_time);
        sink.render(&RenderFrame {
            local: self.states.predicted(),
            remote: remote.as_ref(),
        });
    }

    /// Runs the tick, render and network loops until stopped.
    pub async fn run(
        &mut self,
        input: &mut dyn InputSource,
        renderer: &mut dyn RenderSink,
    ) -> anyhow::Result<()> {
        if self.state == ClientState::Stopped || *self.stop_rx.borrow() {
            self.shutdown();
            return Ok(());
        }
        if self.state == ClientState::Idle {
            self.begin_connect();
        }

        let mut sched = Scheduler::new(self.cfg.tick_interval(), self.cfg.frame_interval());
        let status_requests = self.status_requests.clone();
        info!(
            tick_hz = self.cfg.tick_hz,
            render_hz = self.cfg.render_hz,
            "Client loop started"
        );

        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => break,
                event = self.events.recv(), if self.events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("Transport event channel closed");
                        self.events_open = false;
                    }
                },
                _ = status_requests.notified() => {
                    for line in self.status_lines() {
                        info!("{line}");
                    }
                }
                _ = tokio::time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.reconnect();
                }
                due = sched.next() => match due {
                    Due::Tick => {
                        let sample = input.sample();
                        self.tick(sample);
                    }
                    Due::Frame => {
                        let now = self.clock.now();
                        self.render(renderer, now);
                    }
                },
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Halts the client and closes the transport. Idempotent; safe before
    /// `run` or `connect` were ever called.
    pub fn shutdown(&mut self) {
        if self.state == ClientState::Stopped {
            return;
        }
        info!("Client stopping");
        self.transport.disconnect();
        self.reconnect_at = None;
        self.state = ClientState::Stopped;
        self.stop_tx.send_replace(true);
    }

    fn reconnect(&mut self) {
        self.reconnect_at = None;
        self.stats.reconnect_attempts += 1;
        info!(attempt = self.reconnect_attempt, "Reconnecting");
        self.begin_connect();
    }

    fn schedule_reconnect(&mut self) {
        if self.state == ClientState::Stopped || self.reconnect_at.is_some() {
            return;
        }
        self.reconnect_attempt += 1;
        match self.cfg.reconnect.delay_for(self.reconnect_attempt) {
            Some(delay) => {
                info!(
                    attempt = self.reconnect_attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                warn!(attempts = self.reconnect_attempt - 1, "Not reconnecting");
            }
        }
    }

    pub fn states(&self) -> &StateManager {
        &self.states
    }

    pub fn predicted(&self) -> &GameState {
        self.states.predicted()
    }

    pub fn authoritative(&self) -> Option<&GameState> {
        self.states.authoritative()
    }

    pub fn command_log(&self) -> &CommandLog {
        &self.log
    }

    pub fn interpolation(&self) -> &InterpolationEngine {
        &self.interp
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            snapshots_malformed: self.transport.stats().malformed,
            log_overflows: self.log.overflows(),
            ..self.stats
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn clock(&self) -> ClientClock {
        self.clock
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_at.is_some()
    }

    /// Human-readable status, one fact per line.
    pub fn status_lines(&self) -> Vec<String> {
        let ship = &self.states.predicted().ship;
        let net = self.transport.stats();
        vec![
            format!("State: {:?}", self.state),
            format!("Server: {}", self.cfg.server_url),
            format!(
                "Authoritative tick: {}",
                self.states
                    .authoritative_tick()
                    .map_or_else(|| "-".to_string(), |t| t.to_string())
            ),
            format!(
                "Predicted tick: {} (lead {})",
                self.states.predicted_tick(),
                self.states.prediction_lead()
            ),
            format!(
                "Ship: pos=({:.1}, {:.1}) vel=({:.1}, {:.1}) rot={:.2} energy={:.1}",
                ship.pos.x, ship.pos.y, ship.vel.x, ship.vel.y, ship.rot, ship.energy
            ),
            format!(
                "Pallets left: {}",
                self.states.predicted().active_pallets()
            ),
            format!(
                "Command log: {}/{} (overflows {})",
                self.log.len(),
                self.log.capacity(),
                self.log.overflows()
            ),
            format!("Snapshots buffered: {}", self.interp.len()),
            format!(
                "Snapshots: applied={} stale={} malformed={}",
                self.stats.snapshots_applied, self.stats.snapshots_stale, net.malformed
            ),
            format!(
                "Inputs: predicted={} replayed={} queued={} dropped={}",
                self.stats.commands_predicted, self.stats.commands_replayed, net.queued, net.dropped
            ),
            format!("Last correction: {:.2}", self.stats.last_correction),
        ]
    }
}
