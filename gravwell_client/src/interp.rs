//! Interpolation.
//!
//! The server sends discrete snapshots at its tick rate, with jitter.
//! The client renders at its own rate, a fixed delay behind real time, so
//! that two buffered snapshots almost always bracket the sample point.
//! Sampling never extrapolates past the buffered range.

use std::{collections::VecDeque, time::Duration};

use gravwell_shared::{
    math::lerp_angle,
    state::{GameState, ShipState, Snapshot},
};
use tracing::debug;

/// A buffered snapshot with its client receipt time.
#[derive(Debug, Clone)]
pub struct Buffered {
    pub state: GameState,
    pub received_at: Duration,
}

/// Result of [`InterpolationEngine::add_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    Buffered,
    /// Buffered after evicting the oldest entry.
    Evicted,
    /// Not newer than the last buffered entry, by tick or receipt time.
    Rejected,
}

/// Buffered snapshot history for interpolation.
#[derive(Debug)]
pub struct InterpolationEngine {
    history: VecDeque<Buffered>,
    max: usize,
    render_delay: Duration,
}

impl InterpolationEngine {
    pub fn new(max: usize, render_delay: Duration) -> Self {
        // Interpolation needs at least two entries.
        let max = max.max(2);
        Self {
            history: VecDeque::with_capacity(max),
            max,
            render_delay,
        }
    }

    pub fn add_snapshot(&mut self, snapshot: &Snapshot, received_at: Duration) -> BufferOutcome {
        if let Some(last) = self.history.back() {
            if received_at <= last.received_at || snapshot.tick <= last.state.tick {
                debug!(
                    tick = snapshot.tick,
                    last_tick = last.state.tick,
                    "Snapshot not newer than interpolation buffer"
                );
                return BufferOutcome::Rejected;
            }
        }

        self.history.push_back(Buffered {
            state: GameState::from(snapshot.clone()),
            received_at,
        });

        let mut outcome = BufferOutcome::Buffered;
        while self.history.len() > self.max {
            self.history.pop_front();
            outcome = BufferOutcome::Evicted;
        }
        outcome
    }

    /// Interpolated state for a frame rendered at `render_time`.
    pub fn sample(&self, render_time: Duration) -> Option<GameState> {
        let latest = self.history.back()?;
        if self.history.len() < 2 {
            return Some(latest.state.clone());
        }

        let target = render_time.saturating_sub(self.render_delay);
        let oldest = self.history.front()?;
        if target <= oldest.received_at {
            return Some(oldest.state.clone());
        }
        if target >= latest.received_at {
            return Some(latest.state.clone());
        }

        let (a, b) = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .find(|(a, b)| a.received_at <= target && target < b.received_at)?;

        let span = (b.received_at - a.received_at).as_secs_f64();
        let alpha = ((target - a.received_at).as_secs_f64() / span) as f32;
        Some(interpolate_states(&a.state, &b.state, alpha))
    }

    pub fn render_delay(&self) -> Duration {
        self.render_delay
    }

    /// Returns the number of buffered snapshots.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Returns true if no snapshots are buffered.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn last_snapshot(&self) -> Option<&Buffered> {
        self.history.back()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

/// Blends continuous fields of `a` toward `b`; discrete fields come from `a`.
/// Entities are matched by id; unmatched ones keep their `a` values.
pub fn interpolate_states(a: &GameState, b: &GameState, alpha: f32) -> GameState {
    let mut out = a.clone();
    out.ship = interpolate_ship(&a.ship, &b.ship, alpha);

    for planet in &mut out.planets {
        if let Some(next) = b.planet(planet.id) {
            planet.pos = planet.pos.lerp(next.pos, alpha);
        }
    }
    for pallet in &mut out.pallets {
        if let Some(next) = b.pallet(pallet.id) {
            pallet.pos = pallet.pos.lerp(next.pos, alpha);
        }
    }
    out
}

fn interpolate_ship(a: &ShipState, b: &ShipState, alpha: f32) -> ShipState {
    let t = alpha.clamp(0.0, 1.0);
    ShipState {
        pos: a.pos.lerp(b.pos, t),
        vel: a.vel.lerp(b.vel, t),
        rot: lerp_angle(a.rot, b.rot, t),
        energy: a.energy + (b.energy - a.energy) * t,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravwell_shared::{math::Vec2, state::PalletState};
    use std::f32::consts::PI;

    const DELAY: Duration = Duration::from_millis(100);

    fn snap(tick: u64, x: f32, y: f32) -> Snapshot {
        Snapshot {
            tick,
            ship: ShipState {
                pos: Vec2::new(x, y),
                ..Default::default()
            },
            planets: vec![],
            pallets: vec![],
            done: false,
            win: false,
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn empty_and_single_entry() {
        let mut buf = InterpolationEngine::new(8, DELAY);
        assert!(buf.sample(ms(1000)).is_none());

        buf.add_snapshot(&snap(1, 4.0, 2.0), ms(500));
        let out = buf.sample(ms(0)).unwrap();
        assert_eq!(out.ship.pos, Vec2::new(4.0, 2.0));
        assert_eq!(out.tick, 1);
    }

    #[test]
    fn midpoint_between_bracketing_entries() {
        let mut buf = InterpolationEngine::new(8, DELAY);
        buf.add_snapshot(&snap(1, 0.0, 0.0), ms(1000));
        buf.add_snapshot(&snap(2, 10.0, 20.0), ms(1100));
        buf.add_snapshot(&snap(3, 100.0, 100.0), ms(1200));

        // Target = 1150 - 100 = 1050, halfway between the first two.
        let out = buf.sample(ms(1150)).unwrap();
        assert!((out.ship.pos.x - 5.0).abs() < 1e-4);
        assert!((out.ship.pos.y - 10.0).abs() < 1e-4);
        assert_eq!(out.tick, 1);
    }

    #[test]
    fn never_extrapolates() {
        let mut buf = InterpolationEngine::new(8, DELAY);
        buf.add_snapshot(&snap(1, 0.0, 0.0), ms(1000));
        buf.add_snapshot(&snap(2, 10.0, 0.0), ms(1100));

        assert_eq!(buf.sample(ms(5000)).unwrap().ship.pos, Vec2::new(10.0, 0.0));
        assert_eq!(buf.sample(ms(0)).unwrap().ship.pos, Vec2::new(0.0, 0.0));

        for t in (1000..=1300).step_by(7) {
            let p = buf.sample(ms(t)).unwrap().ship.pos;
            assert!((0.0..=10.0).contains(&p.x), "x = {} at {t}", p.x);
            assert_eq!(p.y, 0.0);
        }
    }

    #[test]
    fn output_lies_on_bracket_segment() {
        let mut buf = InterpolationEngine::new(8, Duration::ZERO);
        let a = Vec2::new(-3.0, 7.0);
        let b = Vec2::new(12.0, -5.0);
        buf.add_snapshot(&snap(1, a.x, a.y), ms(0));
        buf.add_snapshot(&snap(2, b.x, b.y), ms(33));

        for t in 0..=33 {
            let p = buf.sample(ms(t)).unwrap().ship.pos;
            let ab = b - a;
            let ap = p - a;
            let cross = ab.x * ap.y - ab.y * ap.x;
            assert!(cross.abs() < 1e-3, "off segment at {t}: {p:?}");
            let k = ap.dot(ab) / ab.len_sq();
            assert!((-1e-5..=1.0 + 1e-5).contains(&k));
        }
    }

    #[test]
    fn rotation_wraps_the_short_way() {
        let mut buf = InterpolationEngine::new(8, Duration::ZERO);
        let mut s1 = snap(1, 0.0, 0.0);
        s1.ship.rot = PI - 0.1;
        let mut s2 = snap(2, 0.0, 0.0);
        s2.ship.rot = -PI + 0.1;
        buf.add_snapshot(&s1, ms(0));
        buf.add_snapshot(&s2, ms(100));

        let rot = buf.sample(ms(50)).unwrap().ship.rot;
        assert!(rot.abs() > PI - 0.11, "rot = {rot}");
    }

    #[test]
    fn pallets_matched_by_id() {
        let mut s1 = snap(1, 0.0, 0.0);
        s1.pallets = vec![PalletState {
            id: 1,
            pos: Vec2::new(0.0, 0.0),
            active: true,
        }];
        let mut s2 = snap(2, 0.0, 0.0);
        s2.pallets = vec![PalletState {
            id: 1,
            pos: Vec2::new(10.0, 0.0),
            active: false,
        }];
        let out = interpolate_states(&GameState::from(s1), &GameState::from(s2), 0.5);
        assert_eq!(out.pallets[0].pos, Vec2::new(5.0, 0.0));
        assert!(out.pallets[0].active);
    }

    #[test]
    fn rejects_out_of_order_and_evicts_oldest() {
        let mut buf = InterpolationEngine::new(2, DELAY);
        assert_eq!(buf.add_snapshot(&snap(5, 0.0, 0.0), ms(100)), BufferOutcome::Buffered);
        assert_eq!(buf.add_snapshot(&snap(4, 0.0, 0.0), ms(200)), BufferOutcome::Rejected);
        assert_eq!(buf.add_snapshot(&snap(6, 0.0, 0.0), ms(100)), BufferOutcome::Rejected);
        assert_eq!(buf.add_snapshot(&snap(6, 0.0, 0.0), ms(200)), BufferOutcome::Buffered);
        assert_eq!(buf.add_snapshot(&snap(7, 0.0, 0.0), ms(300)), BufferOutcome::Evicted);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.last_snapshot().map(|b| b.state.tick), Some(7));
    }
}
