//! Opaque, store-backed tokens.
//!
//! An opaque token is a random string with no meaning of its own. The token
//! is the store key; the value is a JSON envelope recording the token kind
//! and a caller-defined payload:
//!
//! ```json
//! { "kind": "reset_password", "payload": { "subjectId": "..." } }
//! ```
//!
//! Validity is governed entirely by the store TTL. Resolving a token does
//! not consume it; callers that need single use call
//! [`OpaqueTokenStore::destroy`] once the flow completes.
//!
//! Presented tokens must have the shape of an issued one (unpadded
//! base64url of exactly the configured byte length) before they are used as
//! a key, so other records in a shared store, such as refresh session maps,
//! cannot be read or deleted through this API.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::TokenKind;
use crate::random::{TOKEN_BYTE_LENGTH, generate_opaque_token};
use crate::storage::{Expiry, KeyValueStore, StoreError};
use crate::{AuthError, AuthResult};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<P> {
    kind: TokenKind,
    payload: P,
}

/// Issues, resolves and destroys opaque tokens.
#[derive(Clone)]
pub struct OpaqueTokenStore {
    store: Arc<dyn KeyValueStore>,
    byte_length: usize,
}

impl OpaqueTokenStore {
    /// Creates a store issuing tokens of [`TOKEN_BYTE_LENGTH`] random bytes.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            byte_length: TOKEN_BYTE_LENGTH,
        }
    }

    /// Creates a store issuing tokens of `byte_length` random bytes.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `byte_length` is below
    /// [`TOKEN_BYTE_LENGTH`].
    pub fn with_byte_length(store: Arc<dyn KeyValueStore>, byte_length: usize) -> AuthResult<Self> {
        if byte_length < TOKEN_BYTE_LENGTH {
            return Err(AuthError::configuration(format!(
                "token byte length must be at least {TOKEN_BYTE_LENGTH}, got {byte_length}"
            )));
        }
        Ok(Self { store, byte_length })
    }

    /// Issues a token of `kind` carrying `payload`, valid for `ttl`.
    ///
    /// A zero `ttl` stores the token without expiry.
    ///
    /// # Errors
    ///
    /// - `Generation` - the entropy source failed
    /// - `Serialization` - the payload could not be encoded
    /// - `Storage` - the write failed
    pub async fn issue<P>(&self, kind: TokenKind, payload: &P, ttl: Duration) -> AuthResult<String>
    where
        P: Serialize + Sync,
    {
        let token = generate_opaque_token(self.byte_length)?;
        let value = serde_json::to_string(&Envelope { kind, payload })?;

        self.store.set(&token, &value, Expiry::from(ttl)).await?;

        tracing::debug!(kind = %kind, ttl = ?ttl, "opaque token issued");
        Ok(token)
    }

    /// Looks up `token` and returns its payload if it was issued as
    /// `expected_kind`.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` - the token is malformed, or the stored record
    ///   cannot be decoded as `P`
    /// - `NotFound` - the token was never issued, was destroyed, or expired
    /// - `WrongKind` - the token was issued for another purpose
    /// - `Storage` - the read failed
    pub async fn resolve<P>(&self, token: &str, expected_kind: TokenKind) -> AuthResult<P>
    where
        P: DeserializeOwned,
    {
        if !self.is_well_formed(token) {
            return Err(AuthError::invalid_token("malformed opaque token"));
        }

        let value = match self.store.get(token).await {
            Ok(Some(value)) => value,
            Ok(None) => return Err(AuthError::not_found("opaque token not found or expired")),
            Err(StoreError::WrongType) => {
                return Err(AuthError::invalid_token("key does not hold a token record"));
            }
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope<serde_json::Value> = serde_json::from_str(&value)
            .map_err(|e| AuthError::invalid_token(format!("malformed token record: {e}")))?;

        if envelope.kind != expected_kind {
            return Err(AuthError::wrong_kind(expected_kind, envelope.kind));
        }

        let payload = serde_json::from_value(envelope.payload)
            .map_err(|e| AuthError::invalid_token(format!("unexpected token payload: {e}")))?;

        tracing::trace!(kind = %expected_kind, "opaque token resolved");
        Ok(payload)
    }

    /// Deletes `token`. Destroying an unknown or malformed token is not an
    /// error; a malformed one never reaches the store.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the delete failed.
    pub async fn destroy(&self, token: &str) -> AuthResult<()> {
        if !self.is_well_formed(token) {
            tracing::debug!("ignoring destroy of malformed opaque token");
            return Ok(());
        }

        let removed = self.store.delete(token).await?;
        tracing::debug!(removed, "opaque token destroyed");
        Ok(())
    }

    /// Returns `true` if `token` decodes to exactly `byte_length` bytes.
    fn is_well_formed(&self, token: &str) -> bool {
        // Reject oversized input before decoding it
        if token.len() > self.byte_length.div_ceil(3) * 4 {
            return false;
        }
        URL_SAFE_NO_PAD
            .decode(token)
            .is_ok_and(|bytes| bytes.len() == self.byte_length)
    }
}
