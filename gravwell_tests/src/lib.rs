//! Test harness: a scripted stand-in for the game server.
//!
//! The server side of the protocol is not part of this workspace. The
//! harness accepts one client at a time on an ephemeral port, pushes
//! whatever frames a test scripts, and records the inputs it receives.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use gravwell_shared::{
    math::Vec2,
    net::{
        decode_client_msg, encode_server_msg, read_frame, write_frame, ClientMsg, FramedListener,
        InputMsg, ServerMsg,
    },
    state::{ShipState, Snapshot},
};
use tokio::{net::tcp::OwnedWriteHalf, sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// A snapshot with the ship at `pos`, at rest, full tank, empty world.
pub fn snapshot(tick: u64, pos: Vec2) -> Snapshot {
    Snapshot {
        tick,
        ship: ShipState {
            pos,
            ..Default::default()
        },
        planets: vec![],
        pallets: vec![],
        done: false,
        win: false,
    }
}

pub struct FakeServer {
    listener: FramedListener,
    addr: SocketAddr,
}

impl FakeServer {
    /// Binds to 127.0.0.1 on a port chosen by the OS.
    pub async fn bind_ephemeral() -> anyhow::Result<Self> {
        let listener = FramedListener::bind("127.0.0.1:0".parse()?).await?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Accepts the next client, giving up after `timeout`.
    pub async fn accept(&self, timeout: Duration) -> anyhow::Result<ServerConn> {
        let (conn, peer) = tokio::time::timeout(timeout, self.listener.accept())
            .await
            .context("accept timed out")??;
        debug!(%peer, "Fake server accepted client");

        let (mut rd, wr) = conn.into_inner().into_split();
        let (tx, inputs) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut rd).await {
                    Ok(Some(frame)) => match decode_client_msg(&frame) {
                        Ok(ClientMsg::Input(input)) => {
                            if tx.send(input).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %format!("{e:#}"), "Bad client frame"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %format!("{e:#}"), "Client read ended");
                        break;
                    }
                }
            }
        });

        Ok(ServerConn {
            writer: wr,
            inputs,
            reader,
        })
    }
}

/// One accepted client connection.
pub struct ServerConn {
    writer: OwnedWriteHalf,
    inputs: mpsc::UnboundedReceiver<InputMsg>,
    reader: JoinHandle<()>,
}

impl ServerConn {
    pub async fn send(&mut self, msg: &ServerMsg) -> anyhow::Result<()> {
        let payload = encode_server_msg(msg)?;
        write_frame(&mut self.writer, &payload).await
    }

    pub async fn send_snapshot(&mut self, snapshot: &Snapshot) -> anyhow::Result<()> {
        self.send(&ServerMsg::Snapshot(snapshot.clone())).await
    }

    /// Sends `payload` as one frame without encoding it.
    pub async fn send_raw(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        write_frame(&mut self.writer, payload).await
    }

    /// Next input from the client, or `None` after `timeout`.
    pub async fn next_input(&mut self, timeout: Duration) -> Option<InputMsg> {
        tokio::time::timeout(timeout, self.inputs.recv())
            .await
            .ok()
            .flatten()
    }

    /// Collects `n` inputs, failing if they do not all arrive in `timeout`.
    pub async fn inputs(&mut self, n: usize, timeout: Duration) -> anyhow::Result<Vec<InputMsg>> {
        let mut out = Vec::with_capacity(n);
        let deadline = tokio::time::Instant::now() + timeout;
        while out.len() < n {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let input = self
                .next_input(left)
                .await
                .with_context(|| format!("got {} of {n} inputs", out.len()))?;
            out.push(input);
        }
        Ok(out)
    }

    /// Drops the connection from the server side.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for ServerConn {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
