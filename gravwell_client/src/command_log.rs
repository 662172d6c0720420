//! Command log.
//!
//! Bounded, append-only record of locally issued commands that the server
//! has not yet acknowledged. Reconciliation replays its tail.

use std::collections::VecDeque;

use gravwell_shared::state::Command;
use tracing::{debug, warn};

/// Result of [`CommandLog::append`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppendOutcome {
    Appended,
    /// Sequence was not newer than the last appended one; nothing changed.
    Rejected,
    /// Appended, but the log was full and its oldest entry was dropped.
    Evicted(Command),
}

/// Ring buffer of commands ordered by sequence.
#[derive(Debug)]
pub struct CommandLog {
    entries: VecDeque<Command>,
    capacity: usize,
    /// Survives pruning so monotonicity holds across reconciliations.
    last_sequence: Option<u64>,
    overflows: u64,
}

impl CommandLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            last_sequence: None,
            overflows: 0,
        }
    }

    /// Appends `command` if its sequence is newer than the last appended.
    pub fn append(&mut self, command: Command) -> AppendOutcome {
        if self.last_sequence.is_some_and(|last| command.sequence <= last) {
            debug!(
                sequence = command.sequence,
                last = ?self.last_sequence,
                "Rejected out-of-order command"
            );
            return AppendOutcome::Rejected;
        }
        self.last_sequence = Some(command.sequence);

        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(command);

        match evicted {
            Some(old) => {
                self.overflows += 1;
                warn!(
                    dropped_sequence = old.sequence,
                    dropped_tick = old.tick,
                    capacity = self.capacity,
                    "Command log full before acknowledgement; dropping oldest command"
                );
                AppendOutcome::Evicted(old)
            }
            None => AppendOutcome::Appended,
        }
    }

    /// Commands with `tick > tick`, ascending by sequence.
    pub fn commands_since(&self, tick: u64) -> impl Iterator<Item = &Command> + '_ {
        self.entries.iter().filter(move |c| c.tick > tick)
    }

    /// Drops every command with `tick <= tick`. Returns how many were removed.
    pub fn prune_up_to(&mut self, tick: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|c| c.tick > tick);
        before - self.entries.len()
    }

    pub fn get(&self, sequence: u64) -> Option<&Command> {
        self.entries.iter().find(|c| c.sequence == sequence)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn oldest_tick(&self) -> Option<u64> {
        self.entries.front().map(|c| c.tick)
    }

    pub fn newest_tick(&self) -> Option<u64> {
        self.entries.back().map(|c| c.tick)
    }

    /// Number of entries dropped because the log was full.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops all entries. Sequence monotonicity is kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
