//! Fixed-rate scheduling.
//!
//! Simulation ticks and render frames run on two independent cadences.
//! Neither depends on display refresh: a slow frame never changes the
//! simulation step, and a missed tick is skipped rather than burst-replayed.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Which cadence fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    Tick,
    Frame,
}

pub struct Scheduler {
    tick: Interval,
    frame: Interval,
}

impl Scheduler {
    /// Must be called from within a tokio runtime.
    pub fn new(tick_period: Duration, frame_period: Duration) -> Self {
        let mut tick = time::interval(tick_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frame = time::interval(frame_period);
        frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { tick, frame }
    }

    /// Waits for the next due cadence. Ticks win ties.
    pub async fn next(&mut self) -> Due {
        tokio::select! {
            biased;
            _ = self.tick.tick() => Due::Tick,
            _ = self.frame.tick() => Due::Frame,
        }
    }
}

/// Monotonic client time, measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct ClientClock {
    origin: Instant,
}

impl ClientClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for ClientClock {
    fn default() -> Self {
        Self::new()
    }
}
