//! Record-by-record tailing of the master.
//!
//! Each step reads both cursors, asks [`decide`] what to do, and either waits,
//! replays the one record at the slave cursor, or moves the slave to its next
//! segment when the master reports the end of the current one.

use super::backoff::Backoff;
use super::progress::Phase;
use super::session::{SyncOutcome, SyncSession};
use crate::error::{ProtocolError, SyncError, SyncResult};
use crate::position::{Decision, Position, decide};
use crate::protocol::{Record, Transport};
use tracing::{debug, error, trace};

/// What a single incremental step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Slave already at the master cursor
    Idle,
    /// One record replayed onto the slave
    Applied { at: Position, deleted: bool },
    /// Master segment ended; slave moved to its next segment
    Jumped { from: Position },
}

impl<M: Transport, S: Transport> SyncSession<M, S> {
    pub(super) async fn run_incremental(&mut self) -> SyncResult<SyncOutcome> {
        let mut poll = Backoff::from(&self.options.poll);

        loop {
            if self.stop.is_stopped() {
                return self.stopped();
            }

            match self.step().await {
                Ok(Step::Idle) => {
                    self.succeeded();
                    self.emit(Phase::Waiting);

                    let delay = poll.next_delay();
                    trace!("Caught up, next poll in {:?}", delay);
                    if self.stop.sleep(delay).await {
                        return self.stopped();
                    }
                }
                Ok(step) => {
                    trace!("Step: {:?}", step);
                    self.succeeded();
                    poll.reset();
                    self.emit(Phase::Syncing);
                }
                Err(e) if e.is_transient() => {
                    if self.recover(e).await? {
                        return self.stopped();
                    }
                }
                Err(e) => {
                    error!("Incremental sync stopped: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Run one incremental iteration
    pub async fn step(&mut self) -> SyncResult<Step> {
        let master = self.master_info().await?;
        let slave = self.slave_info().await?;

        match decide(&master, &slave) {
            Decision::Fatal => Err(SyncError::InvariantViolation {
                master: master.position,
                slave: slave.position,
                reason: "slave is ahead of master",
            }),
            Decision::Wait => Ok(Step::Idle),
            Decision::Advance => {
                let at = slave.position;

                let record = match self.master.fetch_record(at).await {
                    Ok(record) => record,
                    Err(e) if e.is_eof() => {
                        debug!("Master segment {} ended, jumping", at.segment);
                        self.slave.jump_segment().await?;
                        return Ok(Step::Jumped { from: at });
                    }
                    Err(e) => return Err(e),
                };

                if record.position != at {
                    return Err(SyncError::Integrity(format!(
                        "requested record at {}, master returned {}",
                        at, record.position
                    )));
                }

                self.apply(record).await
            }
        }
    }

    async fn apply(&mut self, record: Record) -> SyncResult<Step> {
        let at = record.position;
        let key = String::from_utf8_lossy(&record.key).into_owned();

        if record.is_delete {
            trace!("DEL {} at {}", key, at);
            return match self.slave.apply_delete(&record.key, &record.marker).await {
                Ok(()) => Ok(Step::Applied { at, deleted: true }),
                Err(SyncError::Protocol(ProtocolError::Server(reason)))
                | Err(SyncError::Protocol(ProtocolError::UnexpectedReply { reason, .. })) => {
                    Err(SyncError::Integrity(format!(
                        "slave rejected deletion of {} at {}: {}",
                        key, at, reason
                    )))
                }
                Err(e) => Err(e),
            };
        }

        trace!("SET {} at {}", key, at);
        let value = record.value.as_deref().unwrap_or_default();
        let echo = match self.slave.apply_set(&record.key, value, &record.marker).await {
            Ok(echo) => echo,
            Err(SyncError::Protocol(ProtocolError::Server(reason)))
            | Err(SyncError::Protocol(ProtocolError::UnexpectedReply { reason, .. })) => {
                return Err(SyncError::Integrity(format!(
                    "slave did not acknowledge {} at {}: {}",
                    key, at, reason
                )));
            }
            Err(e) => return Err(e),
        };

        if echo != record.key {
            return Err(SyncError::Integrity(format!(
                "slave acknowledged {} instead of {} at {}",
                String::from_utf8_lossy(&echo),
                key,
                at
            )));
        }

        Ok(Step::Applied { at, deleted: false })
    }
}
