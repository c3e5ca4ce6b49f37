//! Challenge-response login
//!
//! 1. `AUTH SECURE CHALLENGE` returns a server nonce
//! 2. `AUTH SECURE sha1hex(nonce ":" password)` must reply OK
//! 3. `SELECT namespace password` must reply OK
//!
//! A client is marked authenticated only when both stages succeed.

use crate::error::{ProtocolError, SyncError, SyncResult};
use crate::protocol::{Transport, ZdbClient};
use sha1::{Digest, Sha1};
use tracing::{info, warn};

/// Lowercase hex SHA1 of `challenge:password`
pub fn challenge_digest(challenge: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(challenge.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Run the two-stage handshake against the client's target namespace.
///
/// Returns `Ok(false)` when the store rejects either stage; transport
/// failures are returned as errors.
pub async fn authenticate<T: Transport>(
    client: &mut ZdbClient<T>,
    password: &str,
) -> SyncResult<bool> {
    client.set_authenticated(false);

    let challenge = match client.auth_request_challenge().await {
        Ok(challenge) => challenge,
        Err(SyncError::Protocol(ProtocolError::Server(reason))) => {
            warn!("{}: challenge refused: {}", client.label(), reason);
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let digest = challenge_digest(&challenge, password);
    if !client.auth_submit(&digest).await? {
        warn!("{}: secure authentication rejected", client.label());
        return Ok(false);
    }

    let namespace = client.target().namespace.clone();
    if !client.select_namespace(&namespace, Some(password)).await? {
        warn!("{}: namespace {} selection rejected", client.label(), namespace);
        return Ok(false);
    }

    client.set_authenticated(true);
    info!("{}: authenticated on namespace {}", client.label(), namespace);

    Ok(true)
}

/// Bring a freshly (re)connected client into a usable state.
///
/// Targets with a password go through [`authenticate`]; targets without one
/// only select their namespace.
pub async fn establish<T: Transport>(client: &mut ZdbClient<T>) -> SyncResult<()> {
    let target = client.target().clone();

    let accepted = match target.password.as_deref() {
        Some(password) => authenticate(client, password).await?,
        None => {
            let selected = client.select_namespace(&target.namespace, None).await?;
            client.set_authenticated(selected);
            selected
        }
    };

    if !accepted {
        return Err(SyncError::Auth(format!("{} refused the login", target)));
    }

    Ok(())
}
