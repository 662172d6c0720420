//! Input handling.
//!
//! Keyboard capture lives outside this crate. It only has to produce held
//! `{thrust, turn}` readings through an [`InputSource`]; the client samples
//! it once per tick and turns non-idle samples into commands.

use gravwell_shared::state::Command;
use tokio::sync::mpsc;

/// Held control values at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    /// Forward thrust in `[0, 1]`.
    pub thrust: f32,
    /// Turn in `[-1, 1]`.
    pub turn: f32,
}

impl InputState {
    pub fn new(thrust: f32, turn: f32) -> Self {
        Self { thrust, turn }
    }

    /// Clamped to the command ranges; non-finite values become zero.
    pub fn sanitized(self) -> Self {
        let command = build_command(0, 0, self);
        Self::new(command.thrust, command.turn)
    }

    /// No control applied; idle samples are neither predicted nor sent.
    /// Check after [`InputState::sanitized`]: reverse thrust clamps to idle.
    pub fn is_idle(self) -> bool {
        self.thrust == 0.0 && self.turn == 0.0
    }
}

/// Turns sampled input into a `Command` for a tick.
pub fn build_command(sequence: u64, tick: u64, input: InputState) -> Command {
    Command {
        sequence,
        tick,
        thrust: input.thrust,
        turn: input.turn,
    }
    .sanitized()
}

/// Something that can be sampled for the currently held input.
pub trait InputSource: Send {
    fn sample(&mut self) -> InputState;
}

/// Fixed input; handy for headless runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantInput(pub InputState);

impl InputSource for ConstantInput {
    fn sample(&mut self) -> InputState {
        self.0
    }
}

/// Input fed from another task. Keeps the latest value until replaced.
#[derive(Debug)]
pub struct ChannelInput {
    rx: mpsc::Receiver<InputState>,
    current: InputState,
}

impl ChannelInput {
    pub fn new(rx: mpsc::Receiver<InputState>) -> Self {
        Self {
            rx,
            current: InputState::default(),
        }
    }
}

impl InputSource for ChannelInput {
    fn sample(&mut self) -> InputState {
        while let Ok(next) = self.rx.try_recv() {
            self.current = next;
        }
        self.current
    }
}
