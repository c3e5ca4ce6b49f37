//! Segment-level copy up to a fixed baseline.
//!
//! The slave is frozen, the master cursor captured once, then whole segment
//! tails are exported and imported until the slave reaches that baseline.
//! Writes landing on the master afterwards are left to incremental sync.

use super::progress::Phase;
use super::session::{SyncOutcome, SyncSession};
use crate::error::{SyncError, SyncResult};
use crate::position::{Decision, NamespaceSnapshot, decide};
use crate::protocol::Transport;
use tracing::{debug, info, warn};

/// Result of one export/import round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BulkStep {
    Imported { bytes: usize },
    Jumped,
    Done,
}

impl<M: Transport, S: Transport> SyncSession<M, S> {
    pub(super) async fn run_bulk(&mut self) -> SyncResult<SyncOutcome> {
        let baseline = loop {
            if self.stop.is_stopped() {
                return self.stopped();
            }

            match self.prepare_bulk().await {
                Ok(baseline) => break baseline,
                Err(e) if e.is_transient() => {
                    if self.recover(e).await? {
                        return self.stopped();
                    }
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            "Bulk baseline {} ({} bytes)",
            baseline.position, baseline.size_bytes
        );

        loop {
            if self.stop.is_stopped() {
                warn!("Bulk sync interrupted, slave stays frozen");
                return self.stopped();
            }

            match self.bulk_step(&baseline).await {
                Ok(BulkStep::Done) => break,
                Ok(step) => {
                    debug!("Bulk step: {:?}", step);
                    self.succeeded();
                    self.emit(Phase::Syncing);
                }
                Err(e) if e.is_transient() => {
                    if self.recover(e).await? {
                        return self.stopped();
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if self.options.bulk.unfreeze_on_completion {
            let namespace = self.namespace.clone();
            self.slave.set_freeze(&namespace, false).await?;
        }

        self.emit(Phase::Finished);
        info!("Bulk sync reached baseline {}", baseline.position);

        Ok(SyncOutcome::Completed)
    }

    /// Freeze the slave and capture the master baseline
    async fn prepare_bulk(&mut self) -> SyncResult<NamespaceSnapshot> {
        let namespace = self.namespace.clone();
        self.slave.set_freeze(&namespace, true).await?;

        let baseline = self.master_info().await?;
        let slave = self.slave_info().await?;

        if decide(&baseline, &slave) == Decision::Fatal {
            return Err(SyncError::InvariantViolation {
                master: baseline.position,
                slave: slave.position,
                reason: "slave is ahead of the bulk baseline",
            });
        }

        Ok(baseline)
    }

    pub(super) async fn bulk_step(&mut self, baseline: &NamespaceSnapshot) -> SyncResult<BulkStep> {
        let at = self.slave_info().await?.position;

        match self.master.export_segment(at).await {
            Ok(blob) => {
                self.slave.import_segment(at, &blob).await?;
                Ok(BulkStep::Imported { bytes: blob.len() })
            }
            Err(e) if e.is_eof() => {
                if at >= baseline.position {
                    if at > baseline.position {
                        warn!(
                            "Slave {} went past baseline {}, master kept writing",
                            at, baseline.position
                        );
                    }
                    return Ok(BulkStep::Done);
                }

                info!("End of segment {}, moving slave to {}", at.segment, at.next_segment());
                self.slave.jump_segment().await?;
                Ok(BulkStep::Jumped)
            }
            Err(e) => Err(e),
        }
    }
}
