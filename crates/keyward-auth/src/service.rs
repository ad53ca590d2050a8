//! Single entry point wiring every credential service from configuration.
//!
//! [`AuthManager`] owns one instance of each service, all sharing the same
//! key-value store handle, and applies the configured lifetimes so that
//! request handlers only pass subjects, payloads and tokens.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::AuthResult;
use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::session::{RefreshSession, RefreshSessionStore, SessionMetadata};
use crate::storage::KeyValueStore;
use crate::token::{OpaqueTokenStore, SignedClaims, SignedTokenCodec, TokenKind};
use crate::verification::VerificationCodeStore;

/// Facade over the signed codec, opaque tokens, refresh sessions and
/// verification codes.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct AuthManager {
    config: AuthConfig,
    signed: SignedTokenCodec,
    opaque: OpaqueTokenStore,
    sessions: RefreshSessionStore,
    codes: VerificationCodeStore,
}

impl AuthManager {
    /// Builds every service from `config` on top of `store`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `config` does not validate.
    pub fn new(config: AuthConfig, store: Arc<dyn KeyValueStore>) -> AuthResult<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new), reading signed token time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `config` does not validate.
    pub fn with_clock(
        config: AuthConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self> {
        config.validate()?;

        let signed = SignedTokenCodec::with_clock(&config.signing_secret, &config.issuer, clock)?;
        let opaque = OpaqueTokenStore::with_byte_length(store.clone(), config.token_byte_length)?;
        let sessions =
            RefreshSessionStore::with_byte_length(store.clone(), config.token_byte_length)?;
        let codes = VerificationCodeStore::new(store);

        tracing::debug!(issuer = %config.issuer, "auth manager initialized");

        Ok(Self {
            config,
            signed,
            opaque,
            sessions,
            codes,
        })
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Returns the signed token codec (e.g. for secret rotation).
    #[must_use]
    pub fn signed_tokens(&self) -> &SignedTokenCodec {
        &self.signed
    }

    /// Returns the opaque token store.
    #[must_use]
    pub fn opaque_tokens(&self) -> &OpaqueTokenStore {
        &self.opaque
    }

    /// Returns the refresh session store.
    #[must_use]
    pub fn sessions(&self) -> &RefreshSessionStore {
        &self.sessions
    }

    /// Returns the verification code store.
    #[must_use]
    pub fn verification_codes(&self) -> &VerificationCodeStore {
        &self.codes
    }

    // ==================== Access tokens ====================

    /// Issues an access token valid for the configured lifetime.
    ///
    /// # Errors
    ///
    /// See [`SignedTokenCodec::issue`].
    pub fn issue_access_token(&self, subject_id: &str) -> AuthResult<String> {
        self.signed
            .issue_access_token(subject_id, self.config.access_token_lifetime)
    }

    /// Verifies an access token.
    ///
    /// # Errors
    ///
    /// See [`SignedTokenCodec::verify`].
    pub fn verify_access_token(&self, token: &str) -> AuthResult<SignedClaims> {
        self.signed.verify_access_token(token)
    }

    // ==================== Opaque tokens ====================

    /// Issues an opaque token valid for the configured lifetime.
    ///
    /// # Errors
    ///
    /// See [`OpaqueTokenStore::issue`].
    pub async fn issue_token<P>(&self, kind: TokenKind, payload: &P) -> AuthResult<String>
    where
        P: Serialize + Sync,
    {
        self.opaque
            .issue(kind, payload, self.config.opaque_token_lifetime)
            .await
    }

    /// Resolves an opaque token.
    ///
    /// # Errors
    ///
    /// See [`OpaqueTokenStore::resolve`].
    pub async fn resolve_token<P>(&self, token: &str, kind: TokenKind) -> AuthResult<P>
    where
        P: DeserializeOwned,
    {
        self.opaque.resolve(token, kind).await
    }

    /// Destroys an opaque token.
    ///
    /// # Errors
    ///
    /// See [`OpaqueTokenStore::destroy`].
    pub async fn destroy_token(&self, token: &str) -> AuthResult<()> {
        self.opaque.destroy(token).await
    }

    // ==================== Refresh sessions ====================

    /// Adds a refresh session, renewing the subject's session set for the
    /// configured lifetime.
    ///
    /// # Errors
    ///
    /// See [`RefreshSessionStore::add_session`].
    pub async fn add_session(
        &self,
        subject_id: &str,
        metadata: &SessionMetadata,
    ) -> AuthResult<String> {
        self.sessions
            .add_session(subject_id, metadata, self.config.refresh_session_lifetime)
            .await
    }

    /// Resolves a refresh session.
    ///
    /// # Errors
    ///
    /// See [`RefreshSessionStore::resolve_session`].
    pub async fn resolve_session(
        &self,
        subject_id: &str,
        token: &str,
    ) -> AuthResult<SessionMetadata> {
        self.sessions.resolve_session(subject_id, token).await
    }

    /// Removes one refresh session.
    ///
    /// # Errors
    ///
    /// See [`RefreshSessionStore::remove_session`].
    pub async fn remove_session(&self, subject_id: &str, token: &str) -> AuthResult<()> {
        self.sessions.remove_session(subject_id, token).await
    }

    /// Removes every refresh session of a subject.
    ///
    /// # Errors
    ///
    /// See [`RefreshSessionStore::terminate_all_sessions`].
    pub async fn terminate_all_sessions(&self, subject_id: &str) -> AuthResult<()> {
        self.sessions.terminate_all_sessions(subject_id).await
    }

    /// Lists a subject's refresh sessions.
    ///
    /// # Errors
    ///
    /// See [`RefreshSessionStore::list_sessions`].
    pub async fn list_sessions(&self, subject_id: &str) -> AuthResult<Vec<RefreshSession>> {
        self.sessions.list_sessions(subject_id).await
    }

    // ==================== Verification codes ====================

    /// Issues a verification code with the configured length and lifetime.
    ///
    /// # Errors
    ///
    /// See [`VerificationCodeStore::issue`].
    pub async fn issue_verification_code(&self, key: &str) -> AuthResult<String> {
        self.codes
            .issue(
                key,
                self.config.verification_code_digits,
                self.config.verification_code_lifetime,
            )
            .await
    }

    /// Compares a submitted verification code.
    ///
    /// # Errors
    ///
    /// See [`VerificationCodeStore::compare`].
    pub async fn compare_verification_code(&self, key: &str, code: &str) -> AuthResult<bool> {
        self.codes.compare(key, code).await
    }
}
