//! `gravwell_shared`
//!
//! Shared libraries used by the client core and any server speaking its
//! protocol.
//!
//! Design goals:
//! - Deterministic where it matters (physics replays bit-identically).
//! - Clear separation of concerns (state, physics, net, config, render).
//! - Traits for abstraction and dependency injection.
//! - No `unsafe`.

pub mod config;
pub mod math;
pub mod net;
pub mod physics;
pub mod render;
pub mod state;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::physics::*;
    pub use crate::state::*;
}
