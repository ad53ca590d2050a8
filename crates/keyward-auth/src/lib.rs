//! # keyward-auth
//!
//! Credential lifecycle management for services that authenticate their own
//! subjects.
//!
//! This crate provides:
//! - Signed, self-contained access tokens (HS256 JWT)
//! - Opaque store-backed tokens for password reset and email verification
//! - Multi-session refresh tokens with per-device revocation
//! - Short numeric verification codes
//!
//! ## Overview
//!
//! Stateless credentials are validated from the token alone. Stateful
//! credentials live in a shared key-value store reached through the
//! [`storage::KeyValueStore`] trait; `keyward-redis` provides the Redis
//! implementation and [`storage::InMemoryStore`] a process-local one.
//!
//! ## Modules
//!
//! - [`random`] - Unbiased random tokens and numeric codes
//! - [`token`] - Signed token codec and opaque token store
//! - [`session`] - Per-subject refresh sessions
//! - [`verification`] - Verification codes
//! - [`storage`] - Key-value store contract and in-memory store
//! - [`service`] - [`AuthManager`] facade built from configuration
//! - [`context`] - Cancellation and deadlines for store calls
//! - [`config`] - Configuration types and loader
//! - [`clock`] - Injectable time source

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod random;
pub mod service;
pub mod session;
pub mod storage;
pub mod token;
pub mod verification;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthConfig, ConfigError, KeywardConfig, RedisConfig};
pub use context::CallContext;
pub use error::{AuthError, ErrorCategory};
pub use service::AuthManager;
pub use session::{RefreshSession, RefreshSessionStore, SessionMetadata, sessions_key};
pub use storage::{Expiry, InMemoryStore, KeyValueStore, StoreError, StoreResult};
pub use token::{
    OpaqueTokenStore, SignedClaims, SignedTokenCodec, TOKEN_ISSUER, TokenKind, TokenPayload,
};
pub use verification::VerificationCodeStore;

/// Type alias for credential operation results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use keyward_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::{AuthConfig, ConfigError, KeywardConfig};
    pub use crate::context::CallContext;
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::service::AuthManager;
    pub use crate::session::{RefreshSession, RefreshSessionStore, SessionMetadata};
    pub use crate::storage::{Expiry, InMemoryStore, KeyValueStore};
    pub use crate::token::{
        OpaqueTokenStore, SignedClaims, SignedTokenCodec, TokenKind, TokenPayload,
    };
    pub use crate::verification::VerificationCodeStore;
}
