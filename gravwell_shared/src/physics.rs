//! Deterministic ship physics.
//!
//! `step` is a pure function of `(state, command, dt)`. The client replays
//! logged commands through it during reconciliation, so it must never read
//! clocks, randomness, or anything outside its arguments.
//!
//! Determinism notes:
//! - Planets are summed in snapshot order; float addition is not associative.
//! - Inputs are clamped, never rejected.

use serde::{Deserialize, Serialize};

use crate::{
    math::{wrap_angle, Vec2},
    state::{Command, GameState, ShipState, MAX_ENERGY},
};

/// Longest step accepted; larger values are clamped.
pub const MAX_STEP_SEC: f32 = 0.25;

/// Physics parameters. Must match the server's values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Gravitational constant `G`.
    pub gravity_constant: f32,
    /// Acceleration at full thrust, units/s^2.
    pub thrust_accel: f32,
    /// Turn rate at full turn input, rad/s.
    pub turn_rate: f32,
    /// Energy spent per second at full thrust.
    pub energy_drain_per_sec: f32,
    /// Ship-to-pallet distance at which a pallet is collected.
    pub pickup_radius: f32,
    /// Lower clamp for the ship-to-planet distance.
    pub min_distance: f32,
    /// Speed cap, units/s.
    pub max_speed: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity_constant: 1000.0,
            thrust_accel: 200.0,
            turn_rate: std::f32::consts::PI,
            energy_drain_per_sec: 10.0,
            pickup_radius: 20.0,
            min_distance: 10.0,
            max_speed: 600.0,
        }
    }
}

/// Fixed-timestep stepper.
pub trait Simulator: Send + Sync {
    fn step(&self, state: &GameState, command: &Command, dt_sec: f32) -> GameState;
}

/// Gravity + thrust + pickup stepper shared by prediction and replay.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShipPhysics {
    pub cfg: PhysicsConfig,
}

impl ShipPhysics {
    pub fn new(cfg: PhysicsConfig) -> Self {
        Self { cfg }
    }

    /// Sum of planet pulls at `pos`.
    pub fn gravity_at(&self, pos: Vec2, state: &GameState) -> Vec2 {
        let min_dist = self.cfg.min_distance.max(f32::EPSILON);
        let mut acc = Vec2::ZERO;
        for planet in &state.planets {
            let to_planet = planet.pos - pos;
            let dist = to_planet.len().max(min_dist);
            let strength = self.cfg.gravity_constant * planet.mass / (dist * dist);
            // Direction is undefined when the ship sits on the planet centre.
            if to_planet.len_sq() > 0.0 {
                acc += to_planet.scale(strength / to_planet.len());
            }
        }
        acc.finite_or_zero()
    }

    fn sanitize_ship(ship: ShipState) -> ShipState {
        ShipState {
            pos: ship.pos.finite_or_zero(),
            vel: ship.vel.finite_or_zero(),
            rot: wrap_angle(ship.rot),
            energy: if ship.energy.is_finite() {
                ship.energy.clamp(0.0, MAX_ENERGY)
            } else {
                0.0
            },
        }
    }
}

impl Simulator for ShipPhysics {
    fn step(&self, state: &GameState, command: &Command, dt_sec: f32) -> GameState {
        let cmd = command.sanitized();
        let dt = if dt_sec.is_finite() {
            dt_sec.clamp(0.0, MAX_STEP_SEC)
        } else {
            0.0
        };

        let mut next = state.clone();
        next.tick = cmd.tick;
        if state.done {
            return next;
        }

        let mut ship = Self::sanitize_ship(state.ship);
        ship.rot = wrap_angle(ship.rot + cmd.turn * self.cfg.turn_rate * dt);

        let thrust = if ship.energy > 0.0 { cmd.thrust } else { 0.0 };
        let accel = self.gravity_at(ship.pos, state)
            + Vec2::from_angle(ship.rot).scale(self.cfg.thrust_accel * thrust);

        ship.vel = (ship.vel + accel.scale(dt))
            .clamp_len(self.cfg.max_speed)
            .finite_or_zero();
        ship.pos = (ship.pos + ship.vel.scale(dt)).finite_or_zero();
        ship.energy = (ship.energy - thrust * self.cfg.energy_drain_per_sec * dt).clamp(0.0, MAX_ENERGY);

        // Provisional on the client; the next snapshot has the final word.
        let pickup_sq = self.cfg.pickup_radius * self.cfg.pickup_radius;
        for pallet in next.pallets.iter_mut().filter(|p| p.active) {
            if (pallet.pos - ship.pos).len_sq() <= pickup_sq {
                pallet.active = false;
            }
        }

        next.ship = ship;
        next
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::state::{PalletState, PlanetState};

    const DT: f32 = 1.0 / 30.0;

    fn cmd(tick: u64, thrust: f32, turn: f32) -> Command {
        Command {
            sequence: tick,
            tick,
            thrust,
            turn,
        }
    }

    fn random_state(rng: &mut StdRng) -> GameState {
        let mut v = || Vec2::new(rng.gen_range(-500.0..500.0), rng.gen_range(-500.0..500.0));
        let ship = ShipState {
            pos: v(),
            vel: v(),
            rot: 0.3,
            energy: 80.0,
        };
        let planets = (0..3)
            .map(|id| PlanetState {
                id,
                pos: v(),
                mass: 50.0,
                radius: 30.0,
            })
            .collect();
        let pallets = (0..4)
            .map(|id| PalletState {
                id,
                pos: v(),
                active: true,
            })
            .collect();
        GameState {
            ship,
            planets,
            pallets,
            tick: 7,
            ..Default::default()
        }
    }

    #[test]
    fn step_is_deterministic() {
        let sim = ShipPhysics::default();
        let mut rng = StdRng::seed_from_u64(0x6752_6176);
        for _ in 0..64 {
            let state = random_state(&mut rng);
            let c = cmd(8, rng.gen_range(0.0..1.0), rng.gen_range(-1.0..1.0));
            let a = sim.step(&state, &c, DT);
            let b = sim.step(&state, &c, DT);
            assert_eq!(a, b);
            assert_eq!(a.ship.pos.x.to_bits(), b.ship.pos.x.to_bits());
        }
    }

    #[test]
    fn thrust_at_zero_heading_moves_along_x() {
        let sim = ShipPhysics::default();
        let state = GameState::default();
        let next = sim.step(&state, &cmd(1, 1.0, 0.0), DT);
        assert!(next.ship.pos.x > 0.0);
        assert_eq!(next.ship.pos.y, 0.0);
        assert!(next.ship.energy < MAX_ENERGY);
        assert_eq!(next.tick, 1);
    }

    #[test]
    fn gravity_pulls_toward_planet() {
        let sim = ShipPhysics::default();
        let state = GameState {
            planets: vec![PlanetState {
                id: 1,
                pos: Vec2::new(100.0, 0.0),
                mass: 10.0,
                radius: 20.0,
            }],
            ..Default::default()
        };
        let next = sim.step(&state, &cmd(1, 0.0, 0.0), DT);
        assert!(next.ship.vel.x > 0.0);
        assert_eq!(next.ship.energy, MAX_ENERGY);
    }

    #[test]
    fn ship_on_planet_centre_stays_finite() {
        let sim = ShipPhysics::default();
        let state = GameState {
            planets: vec![PlanetState {
                id: 1,
                pos: Vec2::ZERO,
                mass: 1.0e6,
                radius: 20.0,
            }],
            ..Default::default()
        };
        let next = sim.step(&state, &cmd(1, 0.0, 0.0), DT);
        assert!(next.ship.pos.is_finite());
        assert!(next.ship.vel.is_finite());
    }

    #[test]
    fn empty_tank_disables_thrust() {
        let sim = ShipPhysics::default();
        let state = GameState {
            ship: ShipState {
                energy: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let next = sim.step(&state, &cmd(1, 1.0, 0.0), DT);
        assert_eq!(next.ship.pos, Vec2::ZERO);
        assert_eq!(next.ship.energy, 0.0);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let sim = ShipPhysics::default();
        let state = GameState {
            ship: ShipState {
                pos: Vec2::new(f32::NAN, 1.0),
                energy: 400.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let next = sim.step(&state, &cmd(1, 9.0, -9.0), f32::INFINITY);
        assert!(next.ship.pos.is_finite());
        assert!(next.ship.energy <= MAX_ENERGY);
        assert!(next.ship.rot <= std::f32::consts::PI);
    }

    #[test]
    fn pallet_in_range_is_collected() {
        let sim = ShipPhysics::default();
        let state = GameState {
            pallets: vec![
                PalletState {
                    id: 1,
                    pos: Vec2::new(5.0, 0.0),
                    active: true,
                },
                PalletState {
                    id: 2,
                    pos: Vec2::new(500.0, 0.0),
                    active: true,
                },
            ],
            ..Default::default()
        };
        let next = sim.step(&state, &cmd(1, 0.0, 0.0), DT);
        assert_eq!(next.pallet(1).map(|p| p.active), Some(false));
        assert_eq!(next.pallet(2).map(|p| p.active), Some(true));
        // Input state untouched.
        assert!(state.pallets.iter().all(|p| p.active));
    }

    #[test]
    fn finished_game_only_advances_tick() {
        let sim = ShipPhysics::default();
        let state = GameState {
            done: true,
            win: true,
            tick: 3,
            ..Default::default()
        };
        let next = sim.step(&state, &cmd(4, 1.0, 1.0), DT);
        assert_eq!(next.ship, state.ship);
        assert_eq!(next.tick, 4);
    }
}
