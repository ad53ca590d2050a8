//! Token issuance and validation.
//!
//! This module provides:
//!
//! - Signed, self-contained tokens (HS256 JWTs) for access tokens
//! - Opaque tokens stored in the key-value store for one-off flows
//!   such as password reset and email verification

pub mod jwt;
pub mod opaque;

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use jwt::{SignedClaims, SignedTokenCodec, TOKEN_ISSUER};
pub use opaque::OpaqueTokenStore;

/// The purpose a token was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Password reset link token.
    ResetPassword,
    /// Email address verification token.
    VerifyEmail,
    /// Short-lived access token.
    AccessToken,
    /// Long-lived refresh token.
    RefreshToken,
}

impl TokenKind {
    /// Returns the kind as used in serialized tokens.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResetPassword => "reset_password",
            Self::VerifyEmail => "verify_email",
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Standard payload identifying who a token was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    /// The principal the token belongs to.
    pub subject_id: String,

    /// What the token may be used for.
    pub kind: TokenKind,

    /// When the token was minted.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl TokenPayload {
    /// Creates a payload for `subject_id` minted at `created_at`.
    #[must_use]
    pub fn new(subject_id: impl Into<String>, kind: TokenKind, created_at: OffsetDateTime) -> Self {
        Self {
            subject_id: subject_id.into(),
            kind,
            created_at,
        }
    }
}
