//! Client-side prediction.
//!
//! Applies local input immediately instead of waiting a round trip. Each
//! prediction logs its command so reconciliation can replay it later.
//!
//! Called once per input event, never once per render frame: stepping
//! without new input would apply the same control twice.

use std::sync::Arc;

use gravwell_shared::{physics::Simulator, state::Command};
use tracing::trace;

use crate::{
    command_log::{AppendOutcome, CommandLog},
    input::{build_command, InputState},
    state_manager::StateManager,
};

pub struct PredictionEngine {
    sim: Arc<dyn Simulator>,
    dt_sec: f32,
    next_sequence: u64,
}

impl PredictionEngine {
    pub fn new(sim: Arc<dyn Simulator>, dt_sec: f32) -> Self {
        Self {
            sim,
            dt_sec,
            next_sequence: 1,
        }
    }

    /// Predicts one input: builds the next command, logs it and advances
    /// the predicted state by one step.
    pub fn predict(
        &mut self,
        input: InputState,
        states: &mut StateManager,
        log: &mut CommandLog,
    ) -> Command {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let base = states.predicted();
        let command = build_command(sequence, base.tick + 1, input);

        // Sequences come from this counter only, so a rejection means the
        // log was fed from elsewhere; the step still runs so the local
        // ship keeps responding.
        if log.append(command) == AppendOutcome::Rejected {
            trace!(sequence, "Command not logged");
        }

        let next = self.sim.step(base, &command, self.dt_sec);
        trace!(
            sequence,
            tick = command.tick,
            x = next.ship.pos.x,
            y = next.ship.pos.y,
            "Predicted"
        );
        states.set_predicted(next);
        command
    }

    /// Sequence number the next prediction will use.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn dt_sec(&self) -> f32 {
        self.dt_sec
    }
}
