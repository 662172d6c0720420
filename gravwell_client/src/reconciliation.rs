//! Server reconciliation.
//!
//! Rollback netcode: on each fresh snapshot the predicted timeline is thrown
//! away, rebuilt from the authoritative state, and the unacknowledged
//! command tail is replayed on top. Because the stepper is deterministic the
//! replay reproduces the trajectory the player already saw whenever client
//! and server agree.
//!
//! No smoothing happens here; any visible pop is the renderer's business.

use std::sync::Arc;

use gravwell_shared::{
    physics::Simulator,
    state::{GameState, Snapshot},
};
use tracing::{debug, warn};

use crate::{command_log::CommandLog, state_manager::StateManager};

/// Corrections larger than this are logged at `warn`.
pub const LARGE_CORRECTION: f32 = 50.0;

/// Result of [`ReconciliationEngine::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// Snapshot was not newer than the held authoritative state.
    Stale { tick: u64, held: u64 },
    Applied {
        tick: u64,
        replayed: usize,
        pruned: usize,
        /// Distance the predicted ship moved because of this correction.
        correction: f32,
    },
}

pub struct ReconciliationEngine {
    sim: Arc<dyn Simulator>,
    dt_sec: f32,
}

impl ReconciliationEngine {
    pub fn new(sim: Arc<dyn Simulator>, dt_sec: f32) -> Self {
        Self { sim, dt_sec }
    }

    pub fn reconcile(
        &self,
        snapshot: &Snapshot,
        states: &mut StateManager,
        log: &mut CommandLog,
    ) -> ReconcileOutcome {
        if let Some(held) = states.authoritative_tick() {
            if snapshot.tick <= held {
                debug!(tick = snapshot.tick, held, "Discarding stale snapshot");
                return ReconcileOutcome::Stale {
                    tick: snapshot.tick,
                    held,
                };
            }
        }

        let before = states.predicted().ship.pos;

        let authoritative = GameState::from(snapshot.clone());
        states.set_authoritative(authoritative.clone());

        let mut predicted = authoritative;
        let mut replayed = 0;
        for command in log.commands_since(snapshot.tick) {
            predicted = self.sim.step(&predicted, command, self.dt_sec);
            replayed += 1;
        }

        let correction = before.distance(predicted.ship.pos);
        states.set_predicted(predicted);

        let pruned = log.prune_up_to(snapshot.tick);

        if correction > LARGE_CORRECTION {
            warn!(
                tick = snapshot.tick,
                correction, replayed, "Large reconciliation correction"
            );
        } else {
            debug!(
                tick = snapshot.tick,
                correction, replayed, pruned, "Reconciled"
            );
        }

        ReconcileOutcome::Applied {
            tick: snapshot.tick,
            replayed,
            pruned,
            correction,
        }
    }
}
