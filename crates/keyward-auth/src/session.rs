//! Multi-session refresh tokens.
//!
//! Every subject owns a set of live refresh sessions, one per logged-in
//! device. The set is stored as a single field map:
//!
//! ```text
//! refresh_sessions:{subject_id}
//!   <token-1> => {"ipAddress":"...","userAgent":"...","loggedInAt":"..."}
//!   <token-2> => {...}
//! ```
//!
//! Each mutation is one atomic store operation on one field (or on the whole
//! key for termination), so concurrent logins and logouts for the same
//! subject never overwrite each other.
//!
//! # Expiry
//!
//! The whole map shares one TTL. Every successful
//! [`add_session`](RefreshSessionStore::add_session) resets it to the TTL
//! passed to that call, so the set lives as long as its most recent login.
//! Removing a session leaves the TTL unchanged.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::random::{TOKEN_BYTE_LENGTH, generate_opaque_token};
use crate::storage::{Expiry, KeyValueStore};
use crate::{AuthError, AuthResult};

/// Prefix of the per-subject session map key.
pub const SESSIONS_KEY_PREFIX: &str = "refresh_sessions";

/// How many fresh tokens are tried before giving up on a collision.
const MAX_TOKEN_ATTEMPTS: usize = 3;

/// Returns the store key holding `subject_id`'s sessions.
#[must_use]
pub fn sessions_key(subject_id: &str) -> String {
    format!("{SESSIONS_KEY_PREFIX}:{subject_id}")
}

/// Client information captured when a session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Client IP address at login.
    pub ip_address: String,

    /// Client user agent at login.
    pub user_agent: String,

    /// When the subject logged in.
    #[serde(with = "time::serde::rfc3339")]
    pub logged_in_at: OffsetDateTime,
}

impl SessionMetadata {
    /// Creates session metadata.
    #[must_use]
    pub fn new(
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        logged_in_at: OffsetDateTime,
    ) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            logged_in_at,
        }
    }
}

/// A live refresh session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    /// The refresh token identifying the session.
    pub token: String,

    /// Client information recorded at login.
    pub metadata: SessionMetadata,
}

/// Stores refresh sessions grouped by subject.
#[derive(Clone)]
pub struct RefreshSessionStore {
    store: Arc<dyn KeyValueStore>,
    byte_length: usize,
}

impl RefreshSessionStore {
    /// Creates a session store issuing tokens of [`TOKEN_BYTE_LENGTH`]
    /// random bytes.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            byte_length: TOKEN_BYTE_LENGTH,
        }
    }

    /// Creates a session store issuing tokens of `byte_length` random bytes.
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

    /// Creates a new session for `subject_id` and returns its refresh token.
    ///
    /// Existing sessions of the subject are preserved. The subject's session
    /// set expires `ttl` after this call unless another session is added; a
    /// zero `ttl` removes the expiry.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` - `subject_id` is empty
    /// - `Generation` - entropy failure, or every generated token collided
    /// - `Serialization` - the metadata could not be encoded
    /// - `Storage` - the write failed
    pub async fn add_session(
        &self,
        subject_id: &str,
        metadata: &SessionMetadata,
        ttl: Duration,
    ) -> AuthResult<String> {
        if subject_id.is_empty() {
            return Err(AuthError::invalid_request("subject id cannot be empty"));
        }

        let key = sessions_key(subject_id);
        let value = serde_json::to_string(metadata)?;
        let expiry = Expiry::from(ttl);

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = generate_opaque_token(self.byte_length)?;
            if self.store.field_insert(&key, &token, &value, expiry).await? {
                tracing::debug!(subject_id = %subject_id, ttl = ?ttl, "refresh session added");
                return Ok(token);
            }
            tracing::warn!(subject_id = %subject_id, attempt, "refresh token collision");
        }

        Err(AuthError::generation(format!(
            "no unique refresh token after {MAX_TOKEN_ATTEMPTS} attempts"
        )))
    }

    /// Returns the metadata of the session identified by `token`.
    ///
    /// Surrounding whitespace in `token` is ignored.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` - no such live session, or its record is corrupt
    /// - `Storage` - the read failed
    pub async fn resolve_session(
        &self,
        subject_id: &str,
        token: &str,
    ) -> AuthResult<SessionMetadata> {
        let raw = self
            .store
            .field_get(&sessions_key(subject_id), token.trim())
            .await?
            .ok_or_else(|| AuthError::invalid_token("refresh session not found"))?;

        serde_json::from_str(&raw)
            .map_err(|e| AuthError::invalid_token(format!("malformed session record: {e}")))
    }

    /// Ends the session identified by `token`, leaving the subject's other
    /// sessions intact.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` - no such live session
    /// - `Storage` - the delete failed
    pub async fn remove_session(&self, subject_id: &str, token: &str) -> AuthResult<()> {
        let removed = self
            .store
            .field_delete(&sessions_key(subject_id), token.trim())
            .await?;

        if !removed {
            return Err(AuthError::invalid_token("refresh session not found"));
        }

        tracing::debug!(subject_id = %subject_id, "refresh session removed");
        Ok(())
    }

    /// Ends every session of `subject_id`.
    ///
    /// Succeeds whether or not the subject had any sessions.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the delete failed.
    pub async fn terminate_all_sessions(&self, subject_id: &str) -> AuthResult<()> {
        let removed = self.store.delete(&sessions_key(subject_id)).await?;
        tracing::debug!(subject_id = %subject_id, removed, "refresh sessions terminated");
        Ok(())
    }

    /// Lists the live sessions of `subject_id`, oldest login first.
    ///
    /// Records that cannot be decoded are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read failed.
    pub async fn list_sessions(&self, subject_id: &str) -> AuthResult<Vec<RefreshSession>> {
        let fields = self.store.field_get_all(&sessions_key(subject_id)).await?;

        let mut sessions: Vec<RefreshSession> = fields
            .into_iter()
            .filter_map(|(token, raw)| match serde_json::from_str(&raw) {
                Ok(metadata) => Some(RefreshSession { token, metadata }),
                Err(e) => {
                    tracing::warn!(subject_id = %subject_id, error = %e, "skipping malformed session record");
                    None
                }
            })
            .collect();

        sessions.sort_by(|a, b| a.metadata.logged_in_at.cmp(&b.metadata.logged_in_at));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{InMemoryStore, StoreResult};

    const TTL: Duration = Duration::from_secs(30 * 24 * 3600);

    fn metadata(ip: &str) -> SessionMetadata {
        SessionMetadata::new(ip, "Mozilla/5.0", OffsetDateTime::UNIX_EPOCH)
    }

    fn sessions() -> (RefreshSessionStore, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (RefreshSessionStore::new(store.clone()), store)
    }

    /// Store whose map inserts always report an existing field.
    struct CollidingStore(InMemoryStore);

    #[async_trait]
    impl KeyValueStore for CollidingStore {
        async fn set(&self, key: &str, value: &str, expiry: Expiry) -> StoreResult<()> {
            self.0.set(key, value, expiry).await
        }

        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.0.get(key).await
        }

        async fn delete(&self, key: &str) -> StoreResult<bool> {
            self.0.delete(key).await
        }

        async fn field_insert(&self, _: &str, _: &str, _: &str, _: Expiry) -> StoreResult<bool> {
            Ok(false)
        }

        async fn field_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
            self.0.field_get(key, field).await
        }

        async fn field_get_all(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
            self.0.field_get_all(key).await
        }

        async fn field_delete(&self, key: &str, field: &str) -> StoreResult<bool> {
            self.0.field_delete(key, field).await
        }
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_is_an_error() {
        let (sessions, _) = sessions();
        let existing = sessions.add_session("u1", &metadata("a"), TTL).await.unwrap();

        assert!(matches!(
            sessions.add_session("u1", &metadata("b"), Duration::MAX).await,
            Err(AuthError::Storage { .. })
        ));

        // Existing sessions are untouched
        assert!(sessions.resolve_session("u1", &existing).await.is_ok());
        assert_eq!(sessions.list_sessions("u1").await.unwrap().len(), 1);
    }

    #[test]
    fn test_sessions_key() {
        assert_eq!(sessions_key("user-1234"), "refresh_sessions:user-1234");
    }

    #[test]
    fn test_metadata_uses_camel_case() {
        let json = serde_json::to_string(&metadata("10.0.0.1")).unwrap();
        assert!(json.contains("\"ipAddress\":\"10.0.0.1\""));
        assert!(json.contains("\"userAgent\""));
        assert!(json.contains("\"loggedInAt\":\"1970-01-01T00:00:00Z\""));
    }

    #[tokio::test]
    async fn test_add_and_resolve() {
        let (sessions, _) = sessions();

        let token = sessions
            .add_session("u1", &metadata("10.0.0.1"), TTL)
            .await
            .unwrap();
        assert_eq!(token.len(), 43);

        let resolved = sessions.resolve_session("u1", &token).await.unwrap();
        assert_eq!(resolved, metadata("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_resolve_ignores_surrounding_whitespace() {
        let (sessions, _) = sessions();

        let token = sessions
            .add_session("u1", &metadata("10.0.0.1"), TTL)
            .await
            .unwrap();

        assert!(
            sessions
                .resolve_session("u1", &format!("  {token}\n"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_sessions_are_scoped_to_subject() {
        let (sessions, _) = sessions();

        let token = sessions
            .add_session("u1", &metadata("10.0.0.1"), TTL)
            .await
            .unwrap();

        assert!(matches!(
            sessions.resolve_session("u2", &token).await,
            Err(AuthError::InvalidToken { .. })
        ));
        assert!(matches!(
            sessions.remove_session("u2", &token).await,
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_keeps_siblings() {
        let (sessions, _) = sessions();

        let t1 = sessions.add_session("u1", &metadata("a"), TTL).await.unwrap();
        let t2 = sessions.add_session("u1", &metadata("b"), TTL).await.unwrap();
        let t3 = sessions.add_session("u1", &metadata("c"), TTL).await.unwrap();

        sessions.remove_session("u1", &t2).await.unwrap();

        assert_eq!(
            sessions.resolve_session("u1", &t1).await.unwrap().ip_address,
            "a"
        );
        assert_eq!(
            sessions.resolve_session("u1", &t3).await.unwrap().ip_address,
            "c"
        );
        assert!(matches!(
            sessions.resolve_session("u1", &t2).await,
            Err(AuthError::InvalidToken { .. })
        ));
        assert!(matches!(
            sessions.remove_session("u1", &t2).await,
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_terminate_all_is_idempotent() {
        let (sessions, store) = sessions();

        let t1 = sessions.add_session("u1", &metadata("a"), TTL).await.unwrap();
        sessions.add_session("u1", &metadata("b"), TTL).await.unwrap();
        let other = sessions.add_session("u2", &metadata("c"), TTL).await.unwrap();

        sessions.terminate_all_sessions("u1").await.unwrap();
        sessions.terminate_all_sessions("u1").await.unwrap();
        sessions.terminate_all_sessions("nobody").await.unwrap();

        assert!(matches!(
            sessions.resolve_session("u1", &t1).await,
            Err(AuthError::InvalidToken { .. })
        ));
        assert!(sessions.resolve_session("u2", &other).await.is_ok());
        assert_eq!(store.len(), 1);

        // Logging in again after termination starts a fresh set
        let fresh = sessions.add_session("u1", &metadata("d"), TTL).await.unwrap();
        assert!(sessions.resolve_session("u1", &fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_add_slides_expiry() {
        let clock = Arc::new(ManualClock::starting_now());
        let sessions =
            RefreshSessionStore::new(Arc::new(InMemoryStore::with_clock(clock.clone())));
        let ttl = Duration::from_secs(100);

        let first = sessions.add_session("u1", &metadata("a"), ttl).await.unwrap();
        clock.advance(Duration::from_secs(80));
        let second = sessions.add_session("u1", &metadata("b"), ttl).await.unwrap();
        clock.advance(Duration::from_secs(80));

        // 160s after the first add, 80s after the second: the set is alive
        assert!(sessions.resolve_session("u1", &first).await.is_ok());
        assert!(sessions.resolve_session("u1", &second).await.is_ok());

        clock.advance(Duration::from_secs(20));
        assert!(matches!(
            sessions.resolve_session("u1", &second).await,
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_does_not_extend_expiry() {
        let clock = Arc::new(ManualClock::starting_now());
        let sessions =
            RefreshSessionStore::new(Arc::new(InMemoryStore::with_clock(clock.clone())));
        let ttl = Duration::from_secs(100);

        let t1 = sessions.add_session("u1", &metadata("a"), ttl).await.unwrap();
        let t2 = sessions.add_session("u1", &metadata("b"), ttl).await.unwrap();

        clock.advance(Duration::from_secs(90));
        sessions.remove_session("u1", &t1).await.unwrap();
        clock.advance(Duration::from_secs(10));

        assert!(matches!(
            sessions.resolve_session("u1", &t2).await,
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let (sessions, store) = sessions();
        let base = OffsetDateTime::UNIX_EPOCH;

        let later = sessions
            .add_session(
                "u1",
                &SessionMetadata::new("b", "ua", base + Duration::from_secs(60)),
                TTL,
            )
            .await
            .unwrap();
        let earlier = sessions
            .add_session("u1", &SessionMetadata::new("a", "ua", base), TTL)
            .await
            .unwrap();
        store
            .field_insert(&sessions_key("u1"), "corrupt", "{", Expiry::Never)
            .await
            .unwrap();

        let listed = sessions.list_sessions("u1").await.unwrap();
        let tokens: Vec<&str> = listed.iter().map(|s| s.token.as_str()).collect();
        assert_eq!(tokens, vec![earlier.as_str(), later.as_str()]);

        assert!(sessions.list_sessions("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_invalid_token() {
        let (sessions, store) = sessions();

        store
            .field_insert(&sessions_key("u1"), "tok", "not json", Expiry::Never)
            .await
            .unwrap();

        assert!(matches!(
            sessions.resolve_session("u1", "tok").await,
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_persistent_collisions_fail_generation() {
        let sessions = RefreshSessionStore::new(Arc::new(CollidingStore(InMemoryStore::new())));

        assert!(matches!(
            sessions.add_session("u1", &metadata("a"), TTL).await,
            Err(AuthError::Generation { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_subject_rejected() {
        let (sessions, _) = sessions();

        assert!(matches!(
            sessions.add_session("", &metadata("a"), TTL).await,
            Err(AuthError::InvalidRequest { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_all_survive() {
        let (sessions, _) = sessions();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let sessions = sessions.clone();
                tokio::spawn(async move {
                    sessions
                        .add_session("u1", &metadata(&format!("10.0.0.{i}")), TTL)
                        .await
                })
            })
            .collect();

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }

        for token in &tokens {
            assert!(sessions.resolve_session("u1", token).await.is_ok());
        }
        assert_eq!(sessions.list_sessions("u1").await.unwrap().len(), 32);
    }
}
