//! Replication cursor model
//!
//! A [`Position`] is a `(segment, offset)` pair into the append-only sequence of
//! data segments of a namespace. Ordering is lexicographic, which the derived
//! `Ord` gives us through field order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Replication cursor into a namespace's segments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub segment: u32,
    pub offset: u64,
}

impl Position {
    pub const fn new(segment: u32, offset: u64) -> Self {
        Self { segment, offset }
    }

    /// First offset of the following segment
    pub fn next_segment(&self) -> Self {
        Self::new(self.segment + 1, 0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.offset)
    }
}

/// Point-in-time read of a namespace's cursor and stored size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSnapshot {
    pub position: Position,
    pub size_bytes: u64,
}

impl NamespaceSnapshot {
    pub const fn new(position: Position, size_bytes: u64) -> Self {
        Self {
            position,
            size_bytes,
        }
    }
}

/// What the sync loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Slave is ahead of master: roles swapped or corrupted store
    Fatal,
    /// Slave is caught up
    Wait,
    /// Slave is strictly behind
    Advance,
}

/// Compare both sides of a session. Consulted once per loop iteration.
pub fn decide(master: &NamespaceSnapshot, slave: &NamespaceSnapshot) -> Decision {
    use std::cmp::Ordering;

    match slave.position.cmp(&master.position) {
        Ordering::Greater => Decision::Fatal,
        Ordering::Equal => Decision::Wait,
        Ordering::Less => Decision::Advance,
    }
}
