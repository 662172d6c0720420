//! Two-timeline state store.
//!
//! `authoritative` is the last state confirmed by the server; `predicted` is
//! the client's best guess of the present. Reconciliation is the only writer
//! of `authoritative`; prediction and reconciliation write `predicted`.

use gravwell_shared::state::GameState;

#[derive(Debug, Default)]
pub struct StateManager {
    authoritative: Option<GameState>,
    predicted: GameState,
}

impl StateManager {
    /// Starts with no authoritative state and `initial` as the prediction
    /// base.
    pub fn new(initial: GameState) -> Self {
        Self {
            authoritative: None,
            predicted: initial,
        }
    }

    pub fn authoritative(&self) -> Option<&GameState> {
        self.authoritative.as_ref()
    }

    pub fn predicted(&self) -> &GameState {
        &self.predicted
    }

    pub fn authoritative_tick(&self) -> Option<u64> {
        self.authoritative.as_ref().map(|s| s.tick)
    }

    pub fn predicted_tick(&self) -> u64 {
        self.predicted.tick
    }

    /// True if a snapshot at `tick` is not newer than what is held.
    pub fn is_stale(&self, tick: u64) -> bool {
        self.authoritative_tick().is_some_and(|held| tick <= held)
    }

    /// Number of ticks the prediction runs ahead of the server.
    pub fn prediction_lead(&self) -> u64 {
        match self.authoritative_tick() {
            Some(held) => self.predicted.tick.saturating_sub(held),
            None => 0,
        }
    }

    pub fn set_authoritative(&mut self, state: GameState) {
        self.authoritative = Some(state);
    }

    pub fn set_predicted(&mut self, state: GameState) {
        self.predicted = state;
    }

    /// Forgets the server state. The prediction is kept as the local base
    /// until the next snapshot arrives.
    pub fn reset_authoritative(&mut self) {
        self.authoritative = None;
    }
}
