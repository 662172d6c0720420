//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend.
//! A renderer receives read-only state once per frame: the locally
//! controlled ship comes from the predicted timeline, everything else from
//! the interpolated authoritative timeline.

use crate::state::{GameState, ShipState};

/// Draw layers a renderer owns, back to front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderLayer {
    Background,
    Planets,
    Pallets,
    Ship,
    Hud,
}

impl RenderLayer {
    pub const ALL: [RenderLayer; 5] = [
        RenderLayer::Background,
        RenderLayer::Planets,
        RenderLayer::Pallets,
        RenderLayer::Ship,
        RenderLayer::Hud,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RenderLayer::Background => "background",
            RenderLayer::Planets => "planets",
            RenderLayer::Pallets => "pallets",
            RenderLayer::Ship => "ship",
            RenderLayer::Hud => "hud",
        }
    }
}

/// State handed to the renderer for one frame.
#[derive(Debug, Clone, Copy)]
pub struct RenderFrame<'a> {
    /// Predicted state; source of the local ship.
    pub local: &'a GameState,
    /// Interpolated authoritative state, absent until a snapshot arrives.
    pub remote: Option<&'a GameState>,
}

impl RenderFrame<'_> {
    pub fn ship(&self) -> &ShipState {
        &self.local.ship
    }

    /// World the non-local layers should draw: interpolated when available.
    pub fn world(&self) -> &GameState {
        self.remote.unwrap_or(self.local)
    }
}

/// A minimal rendering API.
pub trait RenderSink: Send {
    fn layers(&self) -> &[RenderLayer] {
        &RenderLayer::ALL
    }

    fn render(&mut self, frame: &RenderFrame<'_>);
}

/// A no-op renderer useful for headless runs and tests.
#[derive(Default)]
pub struct NullRenderer {
    pub frames: u64,
}

impl RenderSink for NullRenderer {
    fn render(&mut self, _frame: &RenderFrame<'_>) {
        self.frames += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    #[test]
    fn frame_prefers_interpolated_world() {
        let local = GameState {
            tick: 9,
            ..Default::default()
        };
        let mut remote = GameState {
            tick: 7,
            ..Default::default()
        };
        remote.ship.pos = Vec2::new(3.0, 0.0);

        let frame = RenderFrame {
            local: &local,
            remote: Some(&remote),
        };
        assert_eq!(frame.world().tick, 7);
        assert_eq!(frame.ship().pos, Vec2::ZERO);

        let frame = RenderFrame {
            local: &local,
            remote: None,
        };
        assert_eq!(frame.world().tick, 9);
    }

    #[test]
    fn null_renderer_counts_frames() {
        let state = GameState::default();
        let mut r = NullRenderer::default();
        r.render(&RenderFrame {
            local: &state,
            remote: None,
        });
        assert_eq!(r.frames, 1);
        assert_eq!(r.layers().len(), 5);
        assert_eq!(r.layers()[0].name(), "background");
    }
}
