//! Network transport.
//!
//! Frames and parses messages, nothing more. Inbound traffic and connection
//! lifecycle are published as [`NetEvent`]s on a single ordered channel;
//! outbound input goes through a bounded queue drained by a writer task.
//! Transport failures surface as events and are never raised into
//! simulation code.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use gravwell_shared::{
    net::{
        decode_server_msg, encode_client_msg, endpoint_authority, read_frame, resolve_endpoint,
        write_frame, ClientMsg, ServerMsg,
    },
    state::{Command, Snapshot},
};
use thiserror::Error;
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Depth of the inbound event channel.
pub const EVENT_QUEUE: usize = 256;

/// Transport error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid endpoint {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connect to {addr} timed out after {timeout_ms} ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("connection error: {0}")]
    Io(String),

    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    /// True for errors that end a connect attempt, as opposed to an
    /// established link failing.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            TransportError::InvalidUrl { .. }
                | TransportError::ConnectTimeout { .. }
                | TransportError::Connect { .. }
        )
    }
}

/// Everything the transport reports to the client, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    Connected { peer: SocketAddr },
    Disconnected { reason: String },
    Snapshot(Snapshot),
    Error(TransportError),
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Inputs handed to the writer task.
    pub queued: u64,
    /// Inputs dropped because the queue was full or the link was down.
    pub dropped: u64,
    /// Inbound frames that failed to decode.
    pub malformed: u64,
}

/// Connection seam used by `GameClient`.
#[async_trait]
pub trait Transport: Send {
    /// Connects to `url`. Failure is also reported as `NetEvent::Error`.
    async fn connect(&mut self, url: &str) -> Result<(), TransportError>;

    /// Starts connecting to `url` without waiting. The outcome arrives as
    /// `NetEvent::Connected` or a connect-failure `NetEvent::Error`.
    /// Starting again or disconnecting abandons a pending attempt.
    fn start_connect(&mut self, url: &str);

    /// Fire-and-forget; no delivery guarantee.
    fn send_input(&self, command: &Command);

    /// Closes the link. Idempotent.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn stats(&self) -> TransportStats;
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
}

struct Link {
    outbound: mpsc::Sender<ClientMsg>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    /// Cleared by whichever side notices the link going down first, so
    /// `Disconnected` is published once.
    alive: Arc<AtomicBool>,
}

/// State shared between the transport handle and background connect
/// attempts.
struct Shared {
    connect_timeout: Duration,
    queue_depth: usize,
    events: mpsc::Sender<NetEvent>,
    link: Mutex<Option<Link>>,
    /// Id of the current connect attempt. An attempt only installs its
    /// link while its id is still current.
    attempt: AtomicU64,
    counters: Arc<Counters>,
}

impl Shared {
    fn publish(&self, event: NetEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!(error = %e, "Event channel unavailable");
        }
    }

    /// Never held across an await.
    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_link(&self, reason: &str) {
        let link = self.link().take();
        if let Some(link) = link {
            link.reader.abort();
            link.writer.abort();
            if link.alive.swap(false, Ordering::SeqCst) {
                info!(reason, "Disconnected from server");
                self.publish(NetEvent::Disconnected {
                    reason: reason.to_string(),
                });
            }
        }
    }

    async fn open(&self, url: &str) -> Result<TcpStream, TransportError> {
        let invalid = |e: anyhow::Error| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: format!("{e:#}"),
        };
        let authority = endpoint_authority(url).map_err(invalid)?;

        info!(server = %authority, "Connecting to server");
        let target = authority.clone();
        let url = url.to_string();
        let attempt = async move {
            let addrs = resolve_endpoint(&url)
                .await
                .map_err(|e| TransportError::Connect {
                    addr: target.clone(),
                    reason: format!("{e:#}"),
                })?;
            let mut last_error = String::from("no addresses");
            for addr in addrs {
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        debug!(%addr, error = %e, "Address refused");
                        last_error = e.to_string();
                    }
                }
            }
            Err(TransportError::Connect {
                addr: target,
                reason: last_error,
            })
        };

        let stream = match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    addr: authority,
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "set_nodelay failed");
        }
        Ok(stream)
    }

    async fn establish(self: Arc<Self>, url: String, attempt: u64) -> Result<(), TransportError> {
        let stream = match self.open(&url).await {
            Ok(stream) => stream,
            Err(e) => {
                if self.attempt.load(Ordering::SeqCst) == attempt {
                    warn!(error = %e, "Connection failed");
                    self.publish(NetEvent::Error(e.clone()));
                }
                return Err(e);
            }
        };
        let peer = stream
            .peer_addr()
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let mut slot = self.link();
        if self.attempt.load(Ordering::SeqCst) != attempt {
            debug!(%peer, "Connect attempt superseded");
            return Err(TransportError::NotConnected);
        }

        // Published before the reader exists so it precedes any snapshot.
        info!(%peer, "Connected to server");
        self.publish(NetEvent::Connected { peer });

        let (rd, wr) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::channel(self.queue_depth);
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            rd,
            self.events.clone(),
            alive.clone(),
            self.counters.clone(),
        ));
        let writer = tokio::spawn(write_loop(wr, outbound_rx, self.events.clone(), alive.clone()));

        *slot = Some(Link {
            outbound,
            reader,
            writer,
            alive,
        });
        Ok(())
    }
}

/// Length-prefixed JSON over TCP.
pub struct TcpTransport {
    shared: Arc<Shared>,
    pending: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration, queue_depth: usize) -> (Self, mpsc::Receiver<NetEvent>) {
        let (events, rx) = mpsc::channel(EVENT_QUEUE);
        (
            Self {
                shared: Arc::new(Shared {
                    connect_timeout,
                    queue_depth: queue_depth.max(1),
                    events,
                    link: Mutex::new(None),
                    attempt: AtomicU64::new(0),
                    counters: Arc::default(),
                }),
                pending: None,
            },
            rx,
        )
    }

    /// Abandons any pending attempt and closes the link. Returns the id
    /// for the next attempt.
    fn reset(&mut self, reason: &str) -> u64 {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        let attempt = self.shared.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.close_link(reason);
        attempt
    }

    /// True while a background connect attempt is running.
    pub fn is_connecting(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| !p.is_finished())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        let attempt = self.reset("reconnecting");
        self.shared.clone().establish(url.to_string(), attempt).await
    }

    /// Must be called from within a tokio runtime.
    fn start_connect(&mut self, url: &str) {
        let attempt = self.reset("reconnecting");
        let shared = self.shared.clone();
        let url = url.to_string();
        self.pending = Some(tokio::spawn(async move {
            // Failures are published as events.
            let _ = shared.establish(url, attempt).await;
        }));
    }

    fn send_input(&self, command: &Command) {
        let counters = &self.shared.counters;
        let link = self.shared.link();
        let Some(link) = link.as_ref().filter(|l| l.alive.load(Ordering::SeqCst)) else {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(sequence = command.sequence, "Not connected; input dropped");
            return;
        };
        match link.outbound.try_send(ClientMsg::Input(command.into())) {
            Ok(()) => {
                counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(sequence = command.sequence, error = %e, "Input dropped");
            }
        }
    }

    fn disconnect(&mut self) {
        self.reset("closed by client");
    }

    fn is_connected(&self) -> bool {
        self.shared
            .link()
            .as_ref()
            .is_some_and(|l| l.alive.load(Ordering::SeqCst))
    }

    fn stats(&self) -> TransportStats {
        let counters = &self.shared.counters;
        TransportStats {
            queued: counters.queued.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            malformed: counters.malformed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.shared.attempt.fetch_add(1, Ordering::SeqCst);
        if let Some(link) = self.shared.link().take() {
            link.reader.abort();
            link.writer.abort();
        }
    }
}

async fn read_loop(
    mut rd: OwnedReadHalf,
    events: mpsc::Sender<NetEvent>,
    alive: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    let reason = loop {
        match read_frame(&mut rd).await {
            Ok(Some(frame)) => match decode_server_msg(&frame) {
                Ok(ServerMsg::Snapshot(snapshot)) => {
                    if events.send(NetEvent::Snapshot(snapshot)).await.is_err() {
                        return;
                    }
                }
                Ok(ServerMsg::Unknown) => {
                    debug!("Ignoring unknown server message");
                }
                Err(e) => {
                    counters.malformed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %format!("{e:#}"), "Dropping malformed server message");
                }
            },
            Ok(None) => break "server closed connection".to_string(),
            Err(e) => {
                let reason = format!("{e:#}");
                let _ = events
                    .send(NetEvent::Error(TransportError::Io(reason.clone())))
                    .await;
                break reason;
            }
        }
    };

    if alive.swap(false, Ordering::SeqCst) {
        info!(reason = %reason, "Disconnected from server");
        let _ = events.send(NetEvent::Disconnected { reason }).await;
    }
}

async fn write_loop(
    mut wr: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<ClientMsg>,
    events: mpsc::Sender<NetEvent>,
    alive: Arc<AtomicBool>,
) {
    while let Some(msg) = outbound.recv().await {
        let result = match encode_client_msg(&msg) {
            Ok(payload) => write_frame(&mut wr, &payload).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            let reason = format!("{e:#}");
            warn!(error = %reason, "Send failed");
            let _ = events
                .send(NetEvent::Error(TransportError::Io(reason.clone())))
                .await;
            if alive.swap(false, Ordering::SeqCst) {
                let _ = events.send(NetEvent::Disconnected { reason }).await;
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravwell_shared::net::{FramedListener, ServerMsg};
    use gravwell_shared::state::GameState;

    fn transport() -> (TcpTransport, mpsc::Receiver<NetEvent>) {
        TcpTransport::new(Duration::from_millis(500), 8)
    }

    #[tokio::test]
    async fn invalid_url_is_reported() {
        let (mut t, mut events) = transport();
        let err = t.connect("ws://nowhere").await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
        assert_eq!(events.recv().await, Some(NetEvent::Error(err)));
        assert!(!t.is_connected());
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let l = FramedListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
            l.local_addr().unwrap()
        };
        let (mut t, mut events) = transport();
        let err = t.connect(&format!("tcp://{addr}")).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Connect { .. } | TransportError::ConnectTimeout { .. }
        ));
        assert!(matches!(events.recv().await, Some(NetEvent::Error(_))));
    }

    #[tokio::test]
    async fn background_connect_publishes_outcome() {
        let listener = FramedListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (mut t, mut events) = transport();

        t.start_connect(&format!("tcp://{addr}"));
        let (_conn, _) = listener.accept().await.unwrap();
        assert!(matches!(events.recv().await, Some(NetEvent::Connected { .. })));
        assert!(t.is_connected());

        let refused = {
            let l = FramedListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
            l.local_addr().unwrap()
        };
        t.start_connect(&format!("tcp://{refused}"));
        assert!(matches!(
            events.recv().await,
            Some(NetEvent::Disconnected { .. })
        ));
        match events.recv().await {
            Some(NetEvent::Error(e)) => assert!(e.is_connect_failure(), "{e:?}"),
            other => panic!("expected connect error, got {other:?}"),
        }
        assert!(!t.is_connected());
    }

    #[tokio::test]
    async fn host_names_are_resolved() {
        let listener = FramedListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (mut t, _events) = transport();

        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        t.connect(&format!("tcp://localhost:{port}")).await.unwrap();
        accept.await.unwrap().unwrap();
        assert!(t.is_connected());
    }

    #[tokio::test]
    async fn send_without_link_is_dropped() {
        let (t, _events) = transport();
        t.send_input(&Command {
            sequence: 1,
            tick: 1,
            thrust: 1.0,
            turn: 0.0,
        });
        assert_eq!(t.stats().dropped, 1);
        assert_eq!(t.stats().queued, 0);
    }

    #[tokio::test]
    async fn snapshot_delivery_and_disconnect() {
        let listener = FramedListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await?;
            conn.send_raw(b"{\"t\":\"snapshot\",\"tick\":1}").await?;
            let state = GameState {
                tick: 4,
                ..Default::default()
            };
            conn.send_server_msg(&ServerMsg::Snapshot(state.to_snapshot())).await?;
            let msg = conn.recv_client_msg().await?;
            Ok::<_, anyhow::Error>(msg)
        });

        let (mut t, mut events) = transport();
        t.connect(&addr.to_string()).await.unwrap();
        assert!(matches!(events.recv().await, Some(NetEvent::Connected { .. })));

        // The malformed frame is skipped, the valid one delivered.
        match events.recv().await {
            Some(NetEvent::Snapshot(s)) => assert_eq!(s.tick, 4),
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert_eq!(t.stats().malformed, 1);

        t.send_input(&Command {
            sequence: 9,
            tick: 5,
            thrust: 0.5,
            turn: 0.0,
        });
        let received = server.await.unwrap().unwrap();
        assert!(matches!(
            received,
            Some(ClientMsg::Input(m)) if m.sequence == 9 && m.thrust == 0.5
        ));

        // Server task finished and dropped its socket.
        match events.recv().await {
            Some(NetEvent::Disconnected { .. }) => {}
            other => panic!("expected disconnect, got {other:?}"),
        }
        assert!(!t.is_connected());

        // Explicit disconnect afterwards is a no-op.
        t.disconnect();
        t.disconnect();
        assert!(events.try_recv().is_err());
    }
}
