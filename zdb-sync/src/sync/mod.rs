/// Sync engine - replays a master namespace onto a slave
///
/// Two strategies share one session type:
/// - Bulk: freeze slave, copy whole segment tails up to a fixed baseline
/// - Incremental: replay one record per step, poll when caught up
///
/// Features:
/// - Cursor invariant checks on every iteration
/// - Reconnect with exponential backoff on transport failures
/// - Cooperative stop, honoured during backoff sleeps
/// - Progress reports handed to a pluggable observer
pub mod backoff;
pub mod bulk;
pub mod incremental;
pub mod progress;
pub mod session;

pub use backoff::{Backoff, BackoffStrategy, PollConfig, RetryPolicy};
pub use incremental::Step;
pub use progress::{
    LogObserver, PairSnapshot, Phase, ProgressObserver, ProgressReport, human_size, report,
};
pub use session::{
    BulkConfig, StopHandle, StopSignal, Strategy, SyncOptions, SyncOutcome, SyncSession,
    stop_signal, with_retry,
};
