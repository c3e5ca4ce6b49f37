//! Progress reporting
//!
//! A [`ProgressReport`] is derived from two successive [`PairSnapshot`]s plus the
//! time elapsed between them. Reports are handed to a [`ProgressObserver`].

use crate::position::{NamespaceSnapshot, Position};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Master and slave snapshots taken in the same loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PairSnapshot {
    pub master: NamespaceSnapshot,
    pub slave: NamespaceSnapshot,
}

impl PairSnapshot {
    pub fn new(master: NamespaceSnapshot, slave: NamespaceSnapshot) -> Self {
        Self { master, slave }
    }
}

/// What the loop was doing when the report was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Syncing,
    Waiting,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    pub phase: Phase,
    pub synced_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
    /// Slave growth per second between the two snapshots
    pub bytes_per_sec: f64,
    /// Position being requested from the master
    pub slave: Position,
    pub master: Position,
}

/// Derive a report from two snapshots taken `elapsed` apart
pub fn report(
    previous: &PairSnapshot,
    current: &PairSnapshot,
    elapsed: Duration,
    phase: Phase,
) -> ProgressReport {
    let synced_bytes = current.slave.size_bytes;
    let total_bytes = current.master.size_bytes;

    let percent = if total_bytes == 0 {
        100.0
    } else {
        (synced_bytes as f64 / total_bytes as f64 * 100.0).min(100.0)
    };

    let grown = current.slave.size_bytes.saturating_sub(previous.slave.size_bytes);
    let seconds = elapsed.as_secs_f64();
    let bytes_per_sec = if seconds > 0.0 {
        grown as f64 / seconds
    } else {
        0.0
    };

    ProgressReport {
        phase,
        synced_bytes,
        total_bytes,
        percent,
        bytes_per_sec,
        slave: current.slave.position,
        master: current.master.position,
    }
}

/// Human readable size, KB based
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, UNITS[unit])
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.phase {
            Phase::Syncing => "syncing",
            Phase::Waiting => "waiting for changes",
            Phase::Finished => "finished",
        };

        write!(
            f,
            "{}: {} / {} ({:.1}%), {}/s, requesting {} [master {}]",
            state,
            human_size(self.synced_bytes),
            human_size(self.total_bytes),
            self.percent,
            human_size(self.bytes_per_sec as u64),
            self.slave,
            self.master
        )
    }
}

/// Receives progress from a running session
pub trait ProgressObserver: Send {
    fn on_progress(&mut self, report: &ProgressReport);
}

/// Logs progress through `tracing`.
///
/// Syncing lines are rate limited to one `info` per interval, the rest go to `debug`.
pub struct LogObserver {
    interval: Duration,
    last: Option<Instant>,
}

impl LogObserver {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ProgressObserver for LogObserver {
    fn on_progress(&mut self, report: &ProgressReport) {
        let due = self.last.is_none_or(|last| last.elapsed() >= self.interval);

        if report.phase != Phase::Syncing || due {
            info!("{}", report);
            self.last = Some(Instant::now());
        } else {
            debug!("{}", report);
        }
    }
}
