//! Signed token generation and validation.
//!
//! Signed tokens are HS256 JWTs carrying a [`TokenPayload`] plus the
//! standard `iss`, `iat` and `exp` claims. They are stateless: nothing is
//! written to the key-value store and validity depends only on the token,
//! the shared secret and the clock.
//!
//! ## Validation order
//!
//! 1. Header algorithm must be HS256 (pinned, never taken from the token)
//! 2. Signature, structure and issuer
//! 3. `exp` claim present ([`AuthError::NoExpiration`])
//! 4. `exp` in the future ([`AuthError::Expired`])
//! 5. Token kind ([`AuthError::WrongKind`])
//!
//! ## Example
//!
//! ```ignore
//! use keyward_auth::token::{SignedTokenCodec, TokenKind};
//!
//! let codec = SignedTokenCodec::new(secret, "keyward")?;
//! let token = codec.issue("user-1234", TokenKind::AccessToken, Duration::from_secs(900))?;
//! let claims = codec.verify(&token, TokenKind::AccessToken)?;
//! assert_eq!(claims.payload.subject_id, "user-1234");
//! ```

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{TokenKind, TokenPayload};
use crate::clock::{Clock, SystemClock};
use crate::{AuthError, AuthResult};

/// Default issuer claim for signed tokens.
pub const TOKEN_ISSUER: &str = "keyward";

/// The only algorithm tokens are signed and accepted with.
const ALGORITHM: Algorithm = Algorithm::HS256;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Claims of a signed token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedClaims {
    /// Issuer.
    pub iss: String,

    /// Expiration time (Unix timestamp, seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued at (Unix timestamp, seconds).
    pub iat: i64,

    /// Subject, kind and creation time.
    pub payload: TokenPayload,
}

impl SignedClaims {
    /// Returns the subject the token was issued for.
    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.payload.subject_id
    }

    /// Returns the token kind.
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        self.payload.kind
    }
}

/// HMAC key material derived from the shared secret.
struct SigningSecret {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SigningSecret {
    fn new(secret: &[u8]) -> AuthResult<Self> {
        if secret.is_empty() {
            return Err(AuthError::configuration("signing secret cannot be empty"));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        })
    }
}

/// Issues and verifies signed tokens.
///
/// This codec is thread-safe (`Send + Sync`) and can be shared across
/// async tasks. The secret can be replaced at runtime with
/// [`rotate_secret`](Self::rotate_secret); tokens signed with the previous
/// secret stop verifying immediately.
pub struct SignedTokenCodec {
    secret: ArcSwap<SigningSecret>,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl SignedTokenCodec {
    /// Creates a codec using the system clock.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the secret or issuer is empty.
    pub fn new(secret: impl AsRef<[u8]>, issuer: impl Into<String>) -> AuthResult<Self> {
        Self::with_clock(secret, issuer, Arc::new(SystemClock))
    }

    /// Creates a codec reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the secret or issuer is empty.
    pub fn with_clock(
        secret: impl AsRef<[u8]>,
        issuer: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self> {
        let issuer = issuer.into();
        if issuer.is_empty() {
            return Err(AuthError::configuration("issuer cannot be empty"));
        }

        Ok(Self {
            secret: ArcSwap::from_pointee(SigningSecret::new(secret.as_ref())?),
            issuer,
            clock,
        })
    }

    /// Replaces the signing secret.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the new secret is empty; the current
    /// secret is kept in that case.
    pub fn rotate_secret(&self, secret: impl AsRef<[u8]>) -> AuthResult<()> {
        let next = SigningSecret::new(secret.as_ref())?;
        self.secret.store(Arc::new(next));
        tracing::info!("signing secret rotated");
        Ok(())
    }

    /// Returns the issuer claim value.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issues a signed token for `subject_id` valid for `valid_for`.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` - `valid_for` reaches past the representable range
    /// - `Internal` - signing failed
    pub fn issue(
        &self,
        subject_id: &str,
        kind: TokenKind,
        valid_for: Duration,
    ) -> AuthResult<String> {
        let now = self.clock.now();
        let claims = SignedClaims {
            iss: self.issuer.clone(),
            exp: Some(expiry_timestamp(now, valid_for)?),
            iat: now.unix_timestamp(),
            payload: TokenPayload::new(subject_id, kind, now),
        };

        let token = self.sign(&claims)?;
        tracing::debug!(subject_id = %subject_id, kind = %kind, valid_for = ?valid_for, "signed token issued");
        Ok(token)
    }

    /// Verifies `token` and checks that it was issued as `expected_kind`.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` - malformed, wrong algorithm, bad signature or issuer
    /// - `NoExpiration` - the `exp` claim is missing
    /// - `Expired` - the `exp` claim is not in the future
    /// - `WrongKind` - the token was issued for another purpose
    pub fn verify(&self, token: &str, expected_kind: TokenKind) -> AuthResult<SignedClaims> {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[&self.issuer]);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let secret = self.secret.load();
        let claims = decode::<SignedClaims>(token, &secret.decoding_key, &validation)
            .map_err(|e| AuthError::invalid_token(e.to_string()))?
            .claims;

        let exp = claims.exp.ok_or(AuthError::NoExpiration)?;
        if self.clock.now().unix_timestamp_nanos() >= i128::from(exp) * NANOS_PER_SECOND {
            return Err(AuthError::Expired);
        }

        if claims.payload.kind != expected_kind {
            return Err(AuthError::wrong_kind(expected_kind, claims.payload.kind));
        }

        Ok(claims)
    }

    /// Issues an access token for `subject_id`.
    ///
    /// # Errors
    ///
    /// See [`issue`](Self::issue).
    pub fn issue_access_token(&self, subject_id: &str, valid_for: Duration) -> AuthResult<String> {
        self.issue(subject_id, TokenKind::AccessToken, valid_for)
    }

    /// Verifies an access token.
    ///
    /// # Errors
    ///
    /// See [`verify`](Self::verify).
    pub fn verify_access_token(&self, token: &str) -> AuthResult<SignedClaims> {
        self.verify(token, TokenKind::AccessToken)
    }

    fn sign(&self, claims: &SignedClaims) -> AuthResult<String> {
        let secret = self.secret.load();
        encode(&Header::new(ALGORITHM), claims, &secret.encoding_key)
            .map_err(|e| AuthError::internal(format!("failed to sign token: {e}")))
    }
}

/// Rounds `now + valid_for` up to the next whole second, so a token is
/// never considered expired before its full validity has elapsed.
fn expiry_timestamp(now: OffsetDateTime, valid_for: Duration) -> AuthResult<i64> {
    let expires_at = time::Duration::try_from(valid_for)
        .ok()
        .and_then(|valid_for| now.checked_add(valid_for))
        .ok_or_else(|| {
            AuthError::invalid_request(format!("token validity out of range: {valid_for:?}"))
        })?;

    let seconds = expires_at.unix_timestamp();
    if expires_at.nanosecond() > 0 {
        Ok(seconds + 1)
    } else {
        Ok(seconds)
    }
}

#[cfg(test)]
mod tests {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

    use super::*;
    use crate::clock::ManualClock;

    const SECRET: &str = "private-key";

    fn codec_with_clock() -> (SignedTokenCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = SignedTokenCodec::with_clock(SECRET, TOKEN_ISSUER, clock.clone()).unwrap();
        (codec, clock)
    }

    #[test]
    fn test_issue_verify_roundtrip() {
        let codec = SignedTokenCodec::new(SECRET, TOKEN_ISSUER).unwrap();

        let token = codec
            .issue("user-1234", TokenKind::AccessToken, Duration::from_secs(120))
            .unwrap();
        assert!(!token.is_empty());

        let claims = codec.verify(&token, TokenKind::AccessToken).unwrap();
        assert_eq!(claims.subject_id(), "user-1234");
        assert_eq!(claims.kind(), TokenKind::AccessToken);
        assert_eq!(claims.iss, TOKEN_ISSUER);
        assert!(claims.exp.unwrap() > claims.iat);
    }

    #[test]
    fn test_access_token_shorthand() {
        let codec = SignedTokenCodec::new(SECRET, TOKEN_ISSUER).unwrap();

        let token = codec
            .issue_access_token("u1", Duration::from_secs(60))
            .unwrap();
        let claims = codec.verify_access_token(&token).unwrap();
        assert_eq!(claims.payload.subject_id, "u1");
    }

    #[test]
    fn test_expires_after_validity() {
        let (codec, clock) = codec_with_clock();

        let token = codec
            .issue("u1", TokenKind::AccessToken, Duration::from_secs(120))
            .unwrap();

        clock.advance(Duration::from_secs(119));
        assert!(codec.verify(&token, TokenKind::AccessToken).is_ok());

        clock.advance(Duration::from_secs(2));
        assert!(matches!(
            codec.verify(&token, TokenKind::AccessToken),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn test_wrong_kind_is_not_invalid_token() {
        let codec = SignedTokenCodec::new(SECRET, TOKEN_ISSUER).unwrap();

        let token = codec
            .issue("u1", TokenKind::AccessToken, Duration::from_secs(60))
            .unwrap();

        let err = codec.verify(&token, TokenKind::RefreshToken).unwrap_err();
        assert!(matches!(
            err,
            AuthError::WrongKind {
                expected: TokenKind::RefreshToken,
                actual: TokenKind::AccessToken,
            }
        ));
    }

    #[test]
    fn test_expiry_checked_before_kind() {
        let (codec, clock) = codec_with_clock();

        let token = codec
            .issue("u1", TokenKind::VerifyEmail, Duration::from_secs(10))
            .unwrap();
        clock.advance(Duration::from_secs(11));

        assert!(matches!(
            codec.verify(&token, TokenKind::AccessToken),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn test_missing_expiry_rejected() {
        let codec = SignedTokenCodec::new(SECRET, TOKEN_ISSUER).unwrap();
        let now = OffsetDateTime::now_utc();

        let token = codec
            .sign(&SignedClaims {
                iss: TOKEN_ISSUER.to_string(),
                exp: None,
                iat: now.unix_timestamp(),
                payload: TokenPayload::new("u1", TokenKind::AccessToken, now),
            })
            .unwrap();

        assert!(matches!(
            codec.verify(&token, TokenKind::AccessToken),
            Err(AuthError::NoExpiration)
        ));
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let issuer = SignedTokenCodec::new("key-one", TOKEN_ISSUER).unwrap();
        let verifier = SignedTokenCodec::new("key-two", TOKEN_ISSUER).unwrap();

        let token = issuer
            .issue("u1", TokenKind::AccessToken, Duration::from_secs(60))
            .unwrap();

        assert!(matches!(
            verifier.verify(&token, TokenKind::AccessToken),
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_bad_signature_reported_before_expiry() {
        let (issuer, clock) = codec_with_clock();
        let verifier =
            SignedTokenCodec::with_clock("other-key", TOKEN_ISSUER, clock.clone()).unwrap();

        let token = issuer
            .issue("u1", TokenKind::AccessToken, Duration::from_secs(1))
            .unwrap();
        clock.advance(Duration::from_secs(60));

        assert!(matches!(
            verifier.verify(&token, TokenKind::AccessToken),
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let codec = SignedTokenCodec::new(SECRET, TOKEN_ISSUER).unwrap();
        let now = OffsetDateTime::now_utc();
        let claims = SignedClaims {
            iss: TOKEN_ISSUER.to_string(),
            exp: Some(now.unix_timestamp() + 60),
            iat: now.unix_timestamp(),
            payload: TokenPayload::new("u1", TokenKind::AccessToken, now),
        };

        // Same secret, different HMAC algorithm
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            codec.verify(&token, TokenKind::AccessToken),
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_unsigned_token_rejected() {
        let codec = SignedTokenCodec::new(SECRET, TOKEN_ISSUER).unwrap();
        let now = OffsetDateTime::now_utc();
        let claims = SignedClaims {
            iss: TOKEN_ISSUER.to_string(),
            exp: Some(now.unix_timestamp() + 60),
            iat: now.unix_timestamp(),
            payload: TokenPayload::new("u1", TokenKind::AccessToken, now),
        };

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let token = format!("{header}.{body}.");

        assert!(matches!(
            codec.verify(&token, TokenKind::AccessToken),
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let issuer = SignedTokenCodec::new(SECRET, "someone-else").unwrap();
        let verifier = SignedTokenCodec::new(SECRET, TOKEN_ISSUER).unwrap();

        let token = issuer
            .issue("u1", TokenKind::AccessToken, Duration::from_secs(60))
            .unwrap();

        assert!(matches!(
            verifier.verify(&token, TokenKind::AccessToken),
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_malformed_token_rejected() {
        let codec = SignedTokenCodec::new(SECRET, TOKEN_ISSUER).unwrap();

        for garbage in ["", "not-a-jwt", "a.b.c", "....."] {
            assert!(matches!(
                codec.verify(garbage, TokenKind::AccessToken),
                Err(AuthError::InvalidToken { .. })
            ));
        }
    }

    #[test]
    fn test_rotate_secret() {
        let codec = SignedTokenCodec::new("old-secret", TOKEN_ISSUER).unwrap();

        let old_token = codec
            .issue("u1", TokenKind::AccessToken, Duration::from_secs(60))
            .unwrap();
        codec.rotate_secret("new-secret").unwrap();
        let new_token = codec
            .issue("u1", TokenKind::AccessToken, Duration::from_secs(60))
            .unwrap();

        assert!(codec.verify(&new_token, TokenKind::AccessToken).is_ok());
        assert!(matches!(
            codec.verify(&old_token, TokenKind::AccessToken),
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            SignedTokenCodec::new("", TOKEN_ISSUER),
            Err(AuthError::Configuration { .. })
        ));

        let codec = SignedTokenCodec::new(SECRET, TOKEN_ISSUER).unwrap();
        assert!(matches!(
            codec.rotate_secret(""),
            Err(AuthError::Configuration { .. })
        ));
    }

    #[test]
    fn test_expiry_timestamp_rounds_up() {
        let whole = OffsetDateTime::from_unix_timestamp(1_000).unwrap();
        assert_eq!(
            expiry_timestamp(whole, Duration::from_secs(120)).unwrap(),
            1_120
        );

        let fractional = whole + Duration::from_millis(300);
        assert_eq!(
            expiry_timestamp(fractional, Duration::from_secs(120)).unwrap(),
            1_121
        );
    }

    #[test]
    fn test_unrepresentable_validity_rejected() {
        let codec = SignedTokenCodec::new(SECRET, TOKEN_ISSUER).unwrap();

        for valid_for in [Duration::MAX, Duration::from_secs(u64::MAX / 2)] {
            assert!(matches!(
                codec.issue("u1", TokenKind::AccessToken, valid_for),
                Err(AuthError::InvalidRequest { .. })
            ));
        }

        // The codec keeps working afterwards
        let token = codec
            .issue("u1", TokenKind::AccessToken, Duration::from_secs(60))
            .unwrap();
        assert!(codec.verify_access_token(&token).is_ok());
    }
}
