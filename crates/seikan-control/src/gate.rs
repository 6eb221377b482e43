//! Mutual-accept gate
//!
//! Each side independently confirms it verified the handshake. The gate opens
//! on the first accept from the second distinct side; repeats are no-ops.

use crate::registry::Role;

/// Result of recording an accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateProgress {
    /// First side to accept
    First,
    /// This side had already accepted, or the gate was already open
    Repeated,
    /// Both sides have now accepted
    Opened,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptGate {
    accepted_a: bool,
    accepted_b: bool,
}

impl AcceptGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, side: Role) -> GateProgress {
        if self.is_open() {
            return GateProgress::Repeated;
        }

        let slot = match side {
            Role::A => &mut self.accepted_a,
            Role::B => &mut self.accepted_b,
        };
        if *slot {
            return GateProgress::Repeated;
        }
        *slot = true;

        if self.is_open() {
            GateProgress::Opened
        } else {
            GateProgress::First
        }
    }

    pub fn is_open(&self) -> bool {
        self.accepted_a && self.accepted_b
    }

    /// The single side that has accepted so far, if exactly one has
    pub fn accepted_side(&self) -> Option<Role> {
        match (self.accepted_a, self.accepted_b) {
            (true, false) => Some(Role::A),
            (false, true) => Some(Role::B),
            _ => None,
        }
    }
}
