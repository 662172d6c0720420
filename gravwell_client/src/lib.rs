//! `gravwell_client`
//!
//! Client-side systems:
//! - TCP transport with length-prefixed JSON frames
//! - Input sampling and command generation
//! - Prediction against a bounded command log
//! - Reconciliation by rollback and replay
//! - Snapshot interpolation for rendering
//! - Fixed-rate tick and frame scheduling

pub mod client;
pub mod command_log;
pub mod input;
pub mod interp;
pub mod prediction;
pub mod reconciliation;
pub mod schedule;
pub mod state_manager;
pub mod transport;

pub use client::{ClientState, ClientStats, GameClient, StopHandle};
pub use transport::{NetEvent, TcpTransport, Transport, TransportError};
