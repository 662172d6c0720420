//! Wire protocol.
//!
//! Goals:
//! - One JSON document per logical event.
//! - Explicit framing over a byte stream: a big-endian `u32` length prefix
//!   followed by the JSON payload.
//! - Keep serialization explicit and versionable.
//!
//! Client -> server messages are tagged by `"type"`, server -> client
//! messages by `"t"`. Both tags are fixed by the server.

use anyhow::{bail, Context};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::state::{Command, Snapshot};

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Client -> server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMsg {
    Input(InputMsg),
}

/// Outbound input payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct InputMsg {
    pub sequence: u64,
    pub thrust: f32,
    pub turn: f32,
}

impl From<&Command> for InputMsg {
    fn from(cmd: &Command) -> Self {
        Self {
            sequence: cmd.sequence,
            thrust: cmd.thrust,
            turn: cmd.turn,
        }
    }
}

/// Server -> client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum ServerMsg {
    Snapshot(Snapshot),
    /// Any message kind this client does not understand.
    #[serde(other)]
    Unknown,
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> anyhow::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        bail!("frame too large: {} bytes", payload.len());
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    w.write_all(&buf).await.context("write frame")?;
    w.flush().await.context("flush frame")?;
    Ok(())
}

/// Reads one length-prefixed frame. Returns `Ok(None)` on a clean EOF at a
/// frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<Option<Bytes>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("read frame len"),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("frame too large: {len} bytes");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("read frame payload")?;
    Ok(Some(Bytes::from(payload)))
}

pub fn encode_client_msg(msg: &ClientMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize client msg")?;
    Ok(Bytes::from(payload))
}

pub fn decode_client_msg(b: &[u8]) -> anyhow::Result<ClientMsg> {
    serde_json::from_slice(b).context("deserialize client msg")
}

pub fn encode_server_msg(msg: &ServerMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize server msg")?;
    Ok(Bytes::from(payload))
}

pub fn decode_server_msg(b: &[u8]) -> anyhow::Result<ServerMsg> {
    serde_json::from_slice(b).context("deserialize server msg")
}

/// Extracts `host:port` from an endpoint URL (`tcp://host:port` or bare
/// `host:port`). The host may be a name, an IPv4 address or a bracketed
/// IPv6 address.
pub fn endpoint_authority(url: &str) -> anyhow::Result<String> {
    let url = url.trim();
    let authority = match url.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => bail!("unsupported scheme {scheme:?}"),
        None => url,
    };
    let authority = authority.trim_end_matches('/');
    let Some((host, port)) = authority.rsplit_once(':') else {
        bail!("missing port in {url:?}");
    };
    if host.is_empty() || host.contains(char::is_whitespace) {
        bail!("bad host in {url:?}");
    }
    port.parse::<u16>()
        .with_context(|| format!("bad port in {url:?}"))?;
    Ok(authority.to_string())
}

/// Resolves an endpoint URL to socket addresses, in resolver order.
pub async fn resolve_endpoint(url: &str) -> anyhow::Result<Vec<SocketAddr>> {
    let authority = endpoint_authority(url)?;
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(authority.as_str())
        .await
        .with_context(|| format!("resolve {authority}"))?
        .collect();
    if addrs.is_empty() {
        bail!("{authority} resolved to no addresses");
    }
    Ok(addrs)
}

/// Framed connection over TCP. Used by servers and test harnesses; the
/// client transport splits the stream into reader and writer tasks instead.
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
}

impl FramedConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send_server_msg(&mut self, msg: &ServerMsg) -> anyhow::Result<()> {
        let payload = encode_server_msg(msg)?;
        write_frame(&mut self.stream, &payload).await
    }

    /// Sends raw bytes as one frame, bypassing the codec.
    pub async fn send_raw(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        write_frame(&mut self.stream, payload).await
    }

    /// Receives the next client message, `Ok(None)` once the peer closed.
    pub async fn recv_client_msg(&mut self) -> anyhow::Result<Option<ClientMsg>> {
        match read_frame(&mut self.stream).await? {
            Some(frame) => decode_client_msg(&frame).map(Some),
            None => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

/// TCP listener yielding framed connections.
pub struct FramedListener {
    listener: TcpListener,
}

impl FramedListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(FramedConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("set nodelay")?;
        Ok((FramedConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{math::Vec2, state::ShipState};

    #[test]
    fn input_msg_wire_shape() {
        let msg = ClientMsg::Input(InputMsg {
            sequence: 7,
            thrust: 1.0,
            turn: -0.5,
        });
        let v: serde_json::Value = serde_json::from_slice(&encode_client_msg(&msg).unwrap()).unwrap();
        assert_eq!(
            v,
            serde_json::json!({ "type": "input", "sequence": 7, "thrust": 1.0, "turn": -0.5 })
        );
    }

    #[test]
    fn decodes_server_snapshot() {
        let raw = br#"{
            "t": "snapshot",
            "tick": 12,
            "ship": { "pos": {"x": 1.5, "y": -2}, "vel": {"x": 0, "y": 0}, "rot": 0.25, "energy": 90 },
            "planets": [ { "id": 1, "pos": {"x": 100, "y": 0}, "mass": 40, "radius": 25 } ],
            "pallets": [ { "id": 4, "pos": {"x": 10, "y": 10}, "active": true } ],
            "done": false,
            "win": false
        }"#;
        let ServerMsg::Snapshot(snap) = decode_server_msg(raw).unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.tick, 12);
        assert_eq!(snap.ship.pos, Vec2::new(1.5, -2.0));
        assert_eq!(snap.planets[0].mass, 40.0);
        assert!(snap.pallets[0].active);
    }

    #[test]
    fn snapshot_missing_field_is_rejected() {
        let raw = br#"{ "t": "snapshot", "tick": 3, "planets": [], "pallets": [], "done": false, "win": false }"#;
        assert!(decode_server_msg(raw).is_err());
    }

    #[test]
    fn unknown_server_message_kind() {
        let raw = br#"{ "t": "chat", "text": "hi" }"#;
        assert_eq!(decode_server_msg(raw).unwrap(), ServerMsg::Unknown);
    }

    #[test]
    fn snapshot_encodes_with_t_tag() {
        let msg = ServerMsg::Snapshot(Snapshot {
            tick: 1,
            ship: ShipState::default(),
            planets: vec![],
            pallets: vec![],
            done: false,
            win: false,
        });
        let v: serde_json::Value = serde_json::from_slice(&encode_server_msg(&msg).unwrap()).unwrap();
        assert_eq!(v["t"], "snapshot");
        assert_eq!(v["ship"]["pos"]["x"], 0.0);
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!(endpoint_authority("tcp://127.0.0.1:40000").unwrap(), "127.0.0.1:40000");
        assert_eq!(endpoint_authority("tcp://localhost:40000/").unwrap(), "localhost:40000");
        assert_eq!(endpoint_authority("[::1]:9").unwrap(), "[::1]:9");
        assert!(endpoint_authority("127.0.0.1:1").is_ok());
        assert!(endpoint_authority("ws://127.0.0.1:1").is_err());
        assert!(endpoint_authority("not an address").is_err());
        assert!(endpoint_authority("tcp://host:99999").is_err());
        assert!(endpoint_authority("tcp://:40000").is_err());
    }

    #[tokio::test]
    async fn resolves_host_names() {
        let addrs = resolve_endpoint("tcp://localhost:40000").await.unwrap();
        assert!(addrs.iter().all(|a| a.port() == 40000 && a.ip().is_loopback()));

        let addrs = resolve_endpoint("127.0.0.1:7").await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:7".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn frames_over_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"{\"t\":\"x\"}").await.unwrap();
        write_frame(&mut a, b"second").await.unwrap();
        drop(a);
        assert_eq!(read_frame(&mut b).await.unwrap().unwrap().as_ref(), b"{\"t\":\"x\"}");
        assert_eq!(read_frame(&mut b).await.unwrap().unwrap().as_ref(), b"second");
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_header_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes()).await.unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }
}
