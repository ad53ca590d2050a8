//! Short numeric verification codes.
//!
//! Codes are stored as plain decimal strings under a caller-chosen key
//! (for example `verify_phone:{subject_id}`). Issuing a new code for a key
//! replaces the previous one, and comparing does not consume the code; the
//! caller decides when a verified code should be discarded.

use std::sync::Arc;
use std::time::Duration;

use crate::random::generate_numeric_code;
use crate::storage::{Expiry, KeyValueStore};
use crate::{AuthError, AuthResult};

/// Issues and checks verification codes.
#[derive(Clone)]
pub struct VerificationCodeStore {
    store: Arc<dyn KeyValueStore>,
}

impl VerificationCodeStore {
    /// Creates a verification code store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Generates a `digit_length` digit code, stores it under `key` for
    /// `ttl` and returns it for delivery.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` - empty key or unsupported code length
    /// - `Generation` - the entropy source failed
    /// - `Storage` - the write failed
    pub async fn issue(&self, key: &str, digit_length: usize, ttl: Duration) -> AuthResult<String> {
        if key.is_empty() {
            return Err(AuthError::invalid_request("verification key cannot be empty"));
        }

        let code = generate_numeric_code(digit_length)?;
        self.store.set(key, &code, Expiry::from(ttl)).await?;

        tracing::debug!(digits = digit_length, ttl = ?ttl, "verification code issued");
        Ok(code)
    }

    /// Checks `submitted` against the code stored under `key`.
    ///
    /// The comparison is exact; no whitespace or formatting is normalized.
    ///
    /// # Errors
    ///
    /// - `NotFound` - no code was issued for `key` or it expired
    /// - `CodeMismatch` - a code exists but differs from `submitted`
    /// - `Storage` - the read failed
    pub async fn compare(&self, key: &str, submitted: &str) -> AuthResult<bool> {
        let stored = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| AuthError::not_found("no verification code issued or it expired"))?;

        if stored != submitted {
            tracing::debug!("verification code mismatch");
            return Err(AuthError::CodeMismatch);
        }

        Ok(true)
    }
}
