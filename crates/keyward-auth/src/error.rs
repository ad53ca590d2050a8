//! Credential error types.
//!
//! Every fallible operation in this crate returns [`AuthError`]. Errors are
//! typed so that callers can tell an expired token from a forged one, or a
//! wrong verification code from a code that was never issued.

use std::fmt;

use crate::storage::StoreError;
use crate::token::TokenKind;

/// Errors that can occur while issuing, resolving or revoking credentials.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token is malformed, carries a bad signature, or does not exist.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The stored record does not exist or its TTL has elapsed.
    #[error("Not found: {message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// The token was issued for a different purpose.
    #[error("Wrong token kind: expected {expected}, found {actual}")]
    WrongKind {
        /// The kind the caller asked for.
        expected: TokenKind,
        /// The kind recorded in the token.
        actual: TokenKind,
    },

    /// The token expiry has passed.
    #[error("Token expired")]
    Expired,

    /// The signed token has no expiry claim.
    #[error("No expiration set for the token")]
    NoExpiration,

    /// The entropy source failed.
    #[error("Generation error: {message}")]
    Generation {
        /// Description of the generation failure.
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The key-value store failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The submitted verification code does not match the stored one.
    #[error("Verification code does not match")]
    CodeMismatch,

    /// The caller cancelled the operation or its deadline elapsed.
    #[error("Operation cancelled")]
    Cancelled,

    /// The request arguments are invalid.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a new `WrongKind` error.
    #[must_use]
    pub fn wrong_kind(expected: TokenKind, actual: TokenKind) -> Self {
        Self::WrongKind { expected, actual }
    }

    /// Creates a new `Generation` error.
    #[must_use]
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the error was caused by the presented credential or
    /// request rather than by the infrastructure.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken { .. }
                | Self::NotFound { .. }
                | Self::WrongKind { .. }
                | Self::Expired
                | Self::NoExpiration
                | Self::CodeMismatch
                | Self::InvalidRequest { .. }
        )
    }

    /// Returns `true` if this is a server-side failure.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Generation { .. }
                | Self::Serialization { .. }
                | Self::Storage { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if this error means the presented token is unusable.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken { .. }
                | Self::WrongKind { .. }
                | Self::Expired
                | Self::NoExpiration
        )
    }

    /// Returns the error category for monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidToken { .. } => ErrorCategory::Token,
            Self::NotFound { .. } => ErrorCategory::Token,
            Self::WrongKind { .. } => ErrorCategory::Token,
            Self::Expired => ErrorCategory::Token,
            Self::NoExpiration => ErrorCategory::Token,
            Self::CodeMismatch => ErrorCategory::Verification,
            Self::InvalidRequest { .. } => ErrorCategory::Validation,
            Self::Generation { .. } => ErrorCategory::Internal,
            Self::Serialization { .. } => ErrorCategory::Internal,
            Self::Internal { .. } => ErrorCategory::Internal,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Categories of credential errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Token validation errors.
    Token,
    /// Verification code errors.
    Verification,
    /// Request validation errors.
    Validation,
    /// Key-value store errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
    /// Caller-initiated aborts.
    Cancelled,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Verification => write!(f, "verification"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
