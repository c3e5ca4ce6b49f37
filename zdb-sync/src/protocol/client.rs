use super::command::{CommandKind, Request};
use super::decoder::{DecoderTable, Record, Reply};
use super::transport::{ConnectionSettings, RedisTransport, Transport};
use crate::error::{ProtocolError, SyncError, SyncResult};
use crate::position::{NamespaceSnapshot, Position};
use crate::target::Target;
use tracing::{debug, trace};

/// Command/response gateway to one store endpoint.
///
/// Holds nothing beyond the transport, the [`Target`] it talks to and whether
/// the login handshake succeeded on the current connection.
pub struct ZdbClient<T> {
    transport: T,
    target: Target,
    decoders: DecoderTable,
    authenticated: bool,
}

impl ZdbClient<RedisTransport> {
    /// Open a RESP connection to the target (not yet authenticated)
    pub async fn connect(target: Target, settings: ConnectionSettings) -> SyncResult<Self> {
        let transport = RedisTransport::connect(target.endpoint.clone(), settings).await?;
        Ok(Self::new(transport, target))
    }
}

impl<T: Transport> ZdbClient<T> {
    pub fn new(transport: T, target: Target) -> Self {
        Self {
            transport,
            target,
            decoders: DecoderTable::standard(),
            authenticated: false,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn label(&self) -> &str {
        &self.target.label
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    async fn call(&mut self, request: Request) -> SyncResult<Reply> {
        if request.kind.requires_auth() && !self.authenticated {
            return Err(SyncError::Auth(format!(
                "{} refused: {} is not authenticated",
                request.kind.name(),
                self.target
            )));
        }

        trace!(target = %self.target.label, command = request.kind.name(), "sending");
        let value = self.transport.execute(&request).await?;
        Ok(self.decoders.decode(request.kind, value)?)
    }

    async fn ack(&mut self, request: Request) -> SyncResult<()> {
        let kind = request.kind;
        match self.call(request).await? {
            Reply::Ack => Ok(()),
            other => Err(mismatch(kind, other)),
        }
    }

    /// Current cursor and size of `namespace`
    pub async fn namespace_info(&mut self, namespace: &str) -> SyncResult<NamespaceSnapshot> {
        match self.call(Request::ns_info(namespace)).await? {
            Reply::Info(snapshot) => Ok(snapshot),
            other => Err(mismatch(CommandKind::NsInfo, other)),
        }
    }

    /// Toggle the advisory write-freeze on `namespace`
    pub async fn set_freeze(&mut self, namespace: &str, enabled: bool) -> SyncResult<()> {
        debug!("{}: freeze {} = {}", self.target.label, namespace, enabled);
        self.ack(Request::ns_freeze(namespace, enabled)).await
    }

    /// Every record from `from` to the end of its segment, as an opaque blob.
    /// Fails with [`ProtocolError::Eof`] when `from` is already at the segment end.
    pub async fn export_segment(&mut self, from: Position) -> SyncResult<Vec<u8>> {
        match self.call(Request::data_export(from)).await? {
            Reply::Blob(blob) => Ok(blob),
            other => Err(mismatch(CommandKind::DataExport, other)),
        }
    }

    /// Load an exported blob at `at`. Not idempotent.
    pub async fn import_segment(&mut self, at: Position, blob: &[u8]) -> SyncResult<()> {
        self.ack(Request::data_import(at, blob)).await
    }

    /// The single record stored at `at`
    pub async fn fetch_record(&mut self, at: Position) -> SyncResult<Record> {
        match self.call(Request::data_raw(at)).await? {
            Reply::Record(record) => Ok(record),
            other => Err(mismatch(CommandKind::DataRaw, other)),
        }
    }

    /// Store `key`, returning the key echoed by the store
    pub async fn apply_set(&mut self, key: &[u8], value: &[u8], marker: &[u8]) -> SyncResult<Vec<u8>> {
        match self.call(Request::set(key, value, marker)).await? {
            Reply::Blob(echo) => Ok(echo),
            other => Err(mismatch(CommandKind::Set, other)),
        }
    }

    /// Delete `key`, tagging the deletion with the originating marker
    pub async fn apply_delete(&mut self, key: &[u8], marker: &[u8]) -> SyncResult<()> {
        self.ack(Request::del(key, marker)).await
    }

    /// Move the target's own cursor to the start of its next segment
    pub async fn jump_segment(&mut self) -> SyncResult<()> {
        debug!("{}: jumping to next segment", self.target.label);
        self.ack(Request::ns_jump()).await
    }

    pub async fn auth_request_challenge(&mut self) -> SyncResult<String> {
        match self.call(Request::auth_challenge()).await? {
            Reply::Text(challenge) => Ok(challenge),
            other => Err(mismatch(CommandKind::AuthChallenge, other)),
        }
    }

    /// Submit the challenge response. `Ok(false)` on any reply but an explicit OK.
    pub async fn auth_submit(&mut self, digest: &str) -> SyncResult<bool> {
        self.accepted(Request::auth_secure(digest)).await
    }

    /// Select `namespace`. `Ok(false)` on any reply but an explicit OK.
    pub async fn select_namespace(
        &mut self,
        namespace: &str,
        password: Option<&str>,
    ) -> SyncResult<bool> {
        self.accepted(Request::select(namespace, password)).await
    }

    async fn accepted(&mut self, request: Request) -> SyncResult<bool> {
        let kind = request.kind;
        match self.call(request).await {
            Ok(Reply::Ack) => Ok(true),
            Ok(other) => {
                debug!("{}: {} rejected: {:?}", self.target.label, kind.name(), other);
                Ok(false)
            }
            Err(SyncError::Protocol(ProtocolError::Server(reason)))
            | Err(SyncError::Protocol(ProtocolError::UnexpectedReply { reason, .. })) => {
                debug!("{}: {} rejected: {}", self.target.label, kind.name(), reason);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Reopen the connection. Authentication must be performed again afterwards.
    pub async fn reconnect(&mut self) -> SyncResult<()> {
        self.authenticated = false;
        self.transport.reconnect().await?;
        Ok(())
    }
}

fn mismatch(kind: CommandKind, reply: Reply) -> SyncError {
    ProtocolError::unexpected(kind.name(), format!("decoded to {:?}", reply)).into()
}
