//! Game state model.
//!
//! Every type here is a plain value. A simulation step never mutates a
//! `GameState` in place; it builds the next one, which keeps rollback and
//! replay free of side effects.

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Upper bound of the ship energy gauge.
pub const MAX_ENERGY: f32 = 100.0;

/// The locally controlled ship.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShipState {
    pub pos: Vec2,
    pub vel: Vec2,
    /// Heading in radians, 0 = +x.
    pub rot: f32,
    /// Remaining energy in `[0, MAX_ENERGY]`.
    pub energy: f32,
}

impl Default for ShipState {
    fn default() -> Self {
        Self {
            pos: Vec2::ZERO,
            vel: Vec2::ZERO,
            rot: 0.0,
            energy: MAX_ENERGY,
        }
    }
}

/// A gravity source. Static for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanetState {
    pub id: u32,
    pub pos: Vec2,
    pub mass: f32,
    #[serde(default)]
    pub radius: f32,
}

/// A collectible. `active` turns false once picked up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PalletState {
    pub id: u32,
    pub pos: Vec2,
    pub active: bool,
}

/// Full simulation state at one tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GameState {
    pub ship: ShipState,
    pub planets: Vec<PlanetState>,
    pub pallets: Vec<PalletState>,
    pub done: bool,
    pub win: bool,
    pub tick: u64,
}

impl GameState {
    pub fn planet(&self, id: u32) -> Option<&PlanetState> {
        self.planets.iter().find(|p| p.id == id)
    }

    pub fn pallet(&self, id: u32) -> Option<&PalletState> {
        self.pallets.iter().find(|p| p.id == id)
    }

    /// Number of pallets still waiting to be collected.
    pub fn active_pallets(&self) -> usize {
        self.pallets.iter().filter(|p| p.active).count()
    }

    /// Builds the wire record for this state.
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            tick: self.tick,
            ship: self.ship,
            planets: self.planets.clone(),
            pallets: self.pallets.clone(),
            done: self.done,
            win: self.win,
        }
    }
}

/// One player input, immutable once logged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub sequence: u64,
    pub tick: u64,
    /// Forward thrust in `[0, 1]`.
    pub thrust: f32,
    /// Turn rate in `[-1, 1]`, positive is counter-clockwise.
    pub turn: f32,
}

impl Command {
    /// Returns the command with its control values clamped to range.
    /// Non-finite values become zero.
    pub fn sanitized(self) -> Self {
        let thrust = if self.thrust.is_finite() {
            self.thrust.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let turn = if self.turn.is_finite() {
            self.turn.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        Self {
            thrust,
            turn,
            ..self
        }
    }
}

/// Authoritative world record as sent by the server.
///
/// The receipt timestamp used for interpolation is assigned by the client
/// and is not part of this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub ship: ShipState,
    pub planets: Vec<PlanetState>,
    pub pallets: Vec<PalletState>,
    pub done: bool,
    pub win: bool,
}

impl From<Snapshot> for GameState {
    fn from(s: Snapshot) -> Self {
        Self {
            ship: s.ship,
            planets: s.planets,
            pallets: s.pallets,
            done: s.done,
            win: s.win,
            tick: s.tick,
        }
    }
}
