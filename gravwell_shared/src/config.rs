//! Configuration system.
//!
//! Loads client configuration from JSON strings/files. Every field has a
//! default, so an empty object is a valid config.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::physics::PhysicsConfig;

/// Root client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint, e.g. `tcp://127.0.0.1:40000`.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Fixed input/simulation rate. Must match the server tick rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Render sampling rate.
    #[serde(default = "default_render_hz")]
    pub render_hz: u32,
    /// How far behind real time remote state is rendered.
    #[serde(default = "default_render_delay_ms")]
    pub render_delay_ms: u64,
    /// Number of snapshots kept for interpolation.
    #[serde(default = "default_interp_capacity")]
    pub interp_capacity: usize,
    /// Number of unacknowledged commands kept for replay.
    #[serde(default = "default_command_log_capacity")]
    pub command_log_capacity: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Outbound input queue depth; inputs beyond it are dropped.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default)]
    pub physics: PhysicsConfig,
}

fn default_server_url() -> String {
    "tcp://127.0.0.1:40000".to_string()
}

fn default_tick_hz() -> u32 {
    30
}

fn default_render_hz() -> u32 {
    60
}

fn default_render_delay_ms() -> u64 {
    100
}

fn default_interp_capacity() -> usize {
    32
}

fn default_command_log_capacity() -> usize {
    256
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_outbound_queue() -> usize {
    64
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            tick_hz: default_tick_hz(),
            render_hz: default_render_hz(),
            render_delay_ms: default_render_delay_ms(),
            interp_capacity: default_interp_capacity(),
            command_log_capacity: default_command_log_capacity(),
            connect_timeout_ms: default_connect_timeout_ms(),
            outbound_queue: default_outbound_queue(),
            reconnect: ReconnectPolicy::default(),
            physics: PhysicsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        debug!(path = %path.display(), server = %cfg.server_url, "Loaded config");
        Ok(cfg)
    }

    /// Fixed simulation step in seconds.
    pub fn dt_sec(&self) -> f32 {
        1.0 / self.tick_hz.max(1) as f32
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz.max(1) as f64)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.render_hz.max(1) as f64)
    }

    pub fn render_delay(&self) -> Duration {
        Duration::from_millis(self.render_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Reconnection behaviour after the transport drops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 0 means retry forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: 250,
            max_backoff_ms: 5000,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based), or `None`
    /// once the policy gives up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled || attempt == 0 {
            return None;
        }
        if self.max_attempts != 0 && attempt > self.max_attempts {
            return None;
        }
        let shift = (attempt - 1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Some(Duration::from_millis(ms))
    }
}
