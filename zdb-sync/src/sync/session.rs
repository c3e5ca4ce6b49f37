use super::backoff::{Backoff, PollConfig, RetryPolicy};
use super::progress::{LogObserver, PairSnapshot, Phase, ProgressObserver, report};
use crate::auth;
use crate::error::{ProtocolError, SyncError, SyncResult};
use crate::position::NamespaceSnapshot;
use crate::protocol::{Transport, ZdbClient};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{Instrument, info, info_span, warn};

/// Synchronization strategy of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One-shot copy of whole segments up to a fixed baseline
    Bulk,
    /// Record-by-record tailing, runs until stopped
    #[default]
    Incremental,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Bulk => write!(f, "bulk"),
            Strategy::Incremental => write!(f, "incremental"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Lift the slave write-freeze once the baseline is reached
    pub unfreeze_on_completion: bool,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            unfreeze_on_completion: true,
        }
    }
}

/// Largest accepted backoff multiplier
pub const MAX_MULTIPLIER: f64 = 100.0;

/// Tunables shared by both strategies
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub poll: PollConfig,
    pub retry: RetryPolicy,
    pub bulk: BulkConfig,
}

impl SyncOptions {
    /// Reject values that would busy-loop or overflow the backoff
    pub fn validate(&self) -> SyncResult<()> {
        if self.poll.interval_ms == 0 {
            return Err(SyncError::Config("poll.interval_ms must be > 0".to_string()));
        }
        if self.retry.initial_delay_ms == 0 {
            return Err(SyncError::Config(
                "retry.initial_delay_ms must be > 0".to_string(),
            ));
        }

        for (field, multiplier) in [
            ("poll.multiplier", self.poll.multiplier),
            ("retry.multiplier", self.retry.multiplier),
        ] {
            if !(1.0..=MAX_MULTIPLIER).contains(&multiplier) {
                return Err(SyncError::Config(format!(
                    "{} must be between 1 and {}, got {}",
                    field, MAX_MULTIPLIER, multiplier
                )));
            }
        }

        Ok(())
    }
}

/// How a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Bulk baseline reached
    Completed,
    /// Stop signal received
    Stopped,
}

/// Sender side of the cooperative stop signal
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Checked at the top of every loop iteration and during backoff sleeps
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected stop handle/signal pair
pub fn stop_signal() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

impl StopSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        stop_signal().1
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless stopped first. Returns `true` when stopped.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }

        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        let signalled = tokio::select! {
            _ = &mut sleep => return false,
            changed = self.rx.wait_for(|stopped| *stopped) => changed.is_ok(),
        };

        if !signalled {
            // Handle dropped: nobody can stop us any more
            sleep.await;
            return false;
        }

        true
    }
}

/// Master/slave pair replicating one namespace.
///
/// Both clients must be authenticated before [`SyncSession::run`]. The most
/// recent snapshot of each side is kept for progress and invariant checks.
pub struct SyncSession<M, S> {
    pub(super) name: String,
    pub(super) namespace: String,
    pub(super) strategy: Strategy,
    pub(super) master: ZdbClient<M>,
    pub(super) slave: ZdbClient<S>,
    pub(super) options: SyncOptions,
    pub(super) stop: StopSignal,
    observer: Box<dyn ProgressObserver>,
    pub(super) last_master: Option<NamespaceSnapshot>,
    pub(super) last_slave: Option<NamespaceSnapshot>,
    reported: Option<(PairSnapshot, Instant)>,
    failures: u32,
    retry_backoff: Backoff,
}

impl<M: Transport, S: Transport> SyncSession<M, S> {
    pub fn new(
        name: impl Into<String>,
        strategy: Strategy,
        master: ZdbClient<M>,
        slave: ZdbClient<S>,
        options: SyncOptions,
    ) -> SyncResult<Self> {
        let namespace = master.target().namespace.clone();
        if slave.target().namespace != namespace {
            return Err(SyncError::Config(format!(
                "master namespace {} differs from slave namespace {}",
                namespace,
                slave.target().namespace
            )));
        }

        let retry_backoff = Backoff::from(&options.retry);

        Ok(Self {
            name: name.into(),
            namespace,
            strategy,
            master,
            slave,
            options,
            stop: StopSignal::never(),
            observer: Box::new(LogObserver::default()),
            last_master: None,
            last_slave: None,
            reported: None,
            failures: 0,
            retry_backoff,
        })
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn master(&self) -> &ZdbClient<M> {
        &self.master
    }

    pub fn slave(&self) -> &ZdbClient<S> {
        &self.slave
    }

    /// Snapshots observed during the latest iteration
    pub fn last_snapshots(&self) -> Option<PairSnapshot> {
        Some(PairSnapshot::new(self.last_master?, self.last_slave?))
    }

    /// Run the configured strategy until completion, stop or fatal error
    pub async fn run(&mut self) -> SyncResult<SyncOutcome> {
        let span = info_span!("session", name = %self.name, namespace = %self.namespace);

        async move {
            self.ensure_authenticated()?;
            info!("Starting {} sync", self.strategy);

            let outcome = match self.strategy {
                Strategy::Bulk => self.run_bulk().await,
                Strategy::Incremental => self.run_incremental().await,
            };

            match &outcome {
                Ok(outcome) => info!("Session ended: {:?}", outcome),
                Err(e) => tracing::error!("Session aborted: {}", e),
            }

            outcome
        }
        .instrument(span)
        .await
    }

    pub(super) fn ensure_authenticated(&self) -> SyncResult<()> {
        for (side, authenticated) in [
            (self.master.target(), self.master.is_authenticated()),
            (self.slave.target(), self.slave.is_authenticated()),
        ] {
            if !authenticated {
                return Err(SyncError::Auth(format!("{} is not authenticated", side)));
            }
        }
        Ok(())
    }

    pub(super) async fn master_info(&mut self) -> SyncResult<NamespaceSnapshot> {
        let snapshot = self.master.namespace_info(&self.namespace).await?;
        self.last_master = Some(snapshot);
        Ok(snapshot)
    }

    /// Read the slave cursor, refusing any move backwards
    pub(super) async fn slave_info(&mut self) -> SyncResult<NamespaceSnapshot> {
        let snapshot = self.slave.namespace_info(&self.namespace).await?;

        if let Some(previous) = self.last_slave {
            if snapshot.position < previous.position {
                return Err(SyncError::InvariantViolation {
                    master: self.last_master.map(|m| m.position).unwrap_or_default(),
                    slave: snapshot.position,
                    reason: "slave position moved backwards",
                });
            }
        }

        self.last_slave = Some(snapshot);
        Ok(snapshot)
    }

    /// An iteration completed, forget past transport failures
    pub(super) fn succeeded(&mut self) {
        if self.failures > 0 {
            info!("Recovered after {} failed attempt(s)", self.failures);
        }
        self.failures = 0;
        self.retry_backoff.reset();
    }

    /// Handle a transient failure: wait, reconnect and re-authenticate both sides.
    ///
    /// Reopening is retried here until both sides are usable again or the retry
    /// budget is spent, so the loop never resumes with a logged-out client.
    /// Nothing is re-sent; the caller resumes from freshly read snapshots.
    /// Returns `Ok(true)` when stopped while waiting.
    pub(super) async fn recover(&mut self, err: SyncError) -> SyncResult<bool> {
        let mut last = into_transport(err);

        loop {
            self.failures += 1;

            if self.failures > self.options.retry.max_retries {
                return Err(SyncError::RetriesExhausted {
                    attempts: self.failures - 1,
                    last,
                });
            }

            let delay = self.retry_backoff.next_delay();
            warn!(
                "Transport failure ({}), reconnecting in {:?} [attempt {}/{}]",
                last, delay, self.failures, self.options.retry.max_retries
            );

            if self.stop.sleep(delay).await {
                return Ok(true);
            }

            match self.reopen().await {
                Ok(()) => {
                    info!("Reconnected master and slave");
                    return Ok(false);
                }
                Err(e) if e.is_transient() => {
                    warn!("Reconnect failed: {}", e);
                    last = into_transport(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn reopen(&mut self) -> SyncResult<()> {
        reopen_client(&mut self.master).await?;
        reopen_client(&mut self.slave).await
    }

    /// Hand a progress report for the latest snapshots to the observer
    pub(super) fn emit(&mut self, phase: Phase) {
        let Some(current) = self.last_snapshots() else {
            return;
        };

        let now = Instant::now();
        let (previous, at) = self.reported.unwrap_or((current, now));
        let report = report(&previous, &current, now.duration_since(at), phase);

        self.observer.on_progress(&report);
        self.reported = Some((current, now));
    }

    /// Emit the final line and report the stop
    pub(super) fn stopped(&mut self) -> SyncResult<SyncOutcome> {
        info!("Stop requested");
        self.emit(Phase::Finished);
        Ok(SyncOutcome::Stopped)
    }
}

async fn reopen_client<T: Transport>(client: &mut ZdbClient<T>) -> SyncResult<()> {
    client.reconnect().await?;
    auth::establish(client).await
}

fn into_transport(err: SyncError) -> ProtocolError {
    match err {
        SyncError::Protocol(e) => e,
        other => ProtocolError::Transport(other.to_string()),
    }
}

/// Run `attempt` until it succeeds, retrying transient failures under `policy`.
///
/// Returns `Ok(None)` when stopped while waiting between attempts.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    stop: &mut StopSignal,
    what: &str,
    mut attempt: F,
) -> SyncResult<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut backoff = Backoff::from(policy);
    let mut failures = 0;

    loop {
        if stop.is_stopped() {
            return Ok(None);
        }

        let err = match attempt().await {
            Ok(value) => return Ok(Some(value)),
            Err(e) if e.is_transient() => into_transport(e),
            Err(e) => return Err(e),
        };

        failures += 1;
        if failures > policy.max_retries {
            return Err(SyncError::RetriesExhausted {
                attempts: failures - 1,
                last: err,
            });
        }

        let delay = backoff.next_delay();
        warn!(
            "{} unavailable ({}), retrying in {:?} [attempt {}/{}]",
            what, err, delay, failures, policy.max_retries
        );

        if stop.sleep(delay).await {
            return Ok(None);
        }
    }
}
