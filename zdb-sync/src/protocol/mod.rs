/// Protocol client for 0-db endpoints
///
/// Commands are namespace-scoped RESP requests:
/// - NSINFO / NSSET / NSJUMP for cursor state and segment rollover
/// - DATA EXPORT / DATA IMPORT for whole-segment copies
/// - DATA RAW plus SET / DEL for record-by-record replay
/// - AUTH SECURE / SELECT for the login handshake
///
/// Replies are decoded through a fixed table built with the client.
pub mod client;
pub mod command;
pub mod decoder;
pub mod transport;

pub use client::ZdbClient;
pub use command::{CommandKind, Request};
pub use decoder::{DecoderTable, Record, Reply};
pub use transport::{ConnectionSettings, RedisTransport, Transport};
