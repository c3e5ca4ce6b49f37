pub mod auth;
pub mod config;
pub mod error;
pub mod position;
pub mod protocol;
pub mod sync;
pub mod target;

#[cfg(test)]
pub(crate) mod sim;

// Re-export commonly used types
pub use auth::{authenticate, challenge_digest, establish};
pub use config::{LogFormat, LoggingConfig, SessionConfig, SyncConfig, TargetConfig};
pub use error::{ProtocolError, SyncError, SyncResult};
pub use position::{Decision, NamespaceSnapshot, Position, decide};
pub use protocol::{ConnectionSettings, RedisTransport, Transport, ZdbClient};
pub use sync::{
    LogObserver, PollConfig, ProgressObserver, ProgressReport, RetryPolicy, StopHandle,
    StopSignal, Strategy, SyncOptions, SyncOutcome, SyncSession, stop_signal, with_retry,
};
pub use target::{Endpoint, Target};
