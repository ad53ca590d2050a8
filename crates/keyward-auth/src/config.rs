//! Credential service configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! issuer = "keyward"
//! signing_secret = "change-me"
//! access_token_lifetime = "15m"
//! refresh_session_lifetime = "30d"
//! opaque_token_lifetime = "1h"
//! verification_code_lifetime = "10m"
//! verification_code_digits = 6
//! token_byte_length = 32
//!
//! [redis]
//! url = "redis://localhost:6379"
//! pool_size = 16
//! timeout_ms = 5000
//! ```
//!
//! Every value can be overridden from the environment with the `KEYWARD__`
//! prefix, e.g. `KEYWARD__AUTH__SIGNING_SECRET`. See [`loader::load_config`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::AuthError;
use crate::random::{MAX_CODE_DIGITS, TOKEN_BYTE_LENGTH};
use crate::token::TOKEN_ISSUER;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct KeywardConfig {
    /// Credential lifetimes and signing.
    pub auth: AuthConfig,

    /// Key-value store connection.
    pub redis: RedisConfig,
}

impl KeywardConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// See [`AuthConfig::validate`] and [`RedisConfig::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.validate()?;
        self.redis.validate()
    }
}

/// Credential lifetimes and token signing.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer claim of signed tokens.
    pub issuer: String,

    /// HMAC secret for signed tokens. Never has a usable default.
    pub signing_secret: String,

    /// Lifetime of signed access tokens.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// TTL of a subject's refresh session set, renewed on every login.
    #[serde(with = "humantime_serde")]
    pub refresh_session_lifetime: Duration,

    /// Lifetime of opaque tokens (password reset, email verification).
    #[serde(with = "humantime_serde")]
    pub opaque_token_lifetime: Duration,

    /// Lifetime of verification codes.
    #[serde(with = "humantime_serde")]
    pub verification_code_lifetime: Duration,

    /// Number of digits in verification codes.
    pub verification_code_digits: usize,

    /// Random bytes per opaque token and refresh token.
    pub token_byte_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: TOKEN_ISSUER.to_string(),
            signing_secret: String::new(),
            access_token_lifetime: Duration::from_secs(15 * 60),
            refresh_session_lifetime: Duration::from_secs(30 * 24 * 3600),
            opaque_token_lifetime: Duration::from_secs(3600),
            verification_code_lifetime: Duration::from_secs(10 * 60),
            verification_code_digits: 6,
            token_byte_length: TOKEN_BYTE_LENGTH,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("issuer", &self.issuer)
            .field("signing_secret", &"[redacted]")
            .field("access_token_lifetime", &self.access_token_lifetime)
            .field("refresh_session_lifetime", &self.refresh_session_lifetime)
            .field("opaque_token_lifetime", &self.opaque_token_lifetime)
            .field("verification_code_lifetime", &self.verification_code_lifetime)
            .field("verification_code_digits", &self.verification_code_digits)
            .field("token_byte_length", &self.token_byte_length)
            .finish()
    }
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the signing secret is empty, and
    /// `ConfigError::InvalidValue` if:
    /// - The issuer is empty
    /// - Any lifetime is zero
    /// - The code length is outside `1..=18`
    /// - The token byte length is below 32
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }

        if self.signing_secret.is_empty() {
            return Err(ConfigError::Missing("auth.signing_secret".to_string()));
        }

        for (name, lifetime) in [
            ("access_token_lifetime", self.access_token_lifetime),
            ("refresh_session_lifetime", self.refresh_session_lifetime),
            ("opaque_token_lifetime", self.opaque_token_lifetime),
            ("verification_code_lifetime", self.verification_code_lifetime),
        ] {
            if lifetime.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        if !(1..=MAX_CODE_DIGITS).contains(&self.verification_code_digits) {
            return Err(ConfigError::InvalidValue(format!(
                "verification_code_digits must be between 1 and {MAX_CODE_DIGITS}, got {}",
                self.verification_code_digits
            )));
        }

        if self.token_byte_length < TOKEN_BYTE_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "token_byte_length must be at least {TOKEN_BYTE_LENGTH}, got {}",
                self.token_byte_length
            )));
        }

        Ok(())
    }
}

/// Redis connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    16
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl RedisConfig {
    /// Returns the pool timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the URL is empty or the pool
    /// size or timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue(
                "redis.url cannot be empty".to_string(),
            ));
        }

        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue(
                "redis.pool_size must be > 0".to_string(),
            ));
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "redis.timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

pub mod loader {
    //! Layered configuration loading: TOML file, then environment.

    use std::path::PathBuf;

    use config::{Config, Environment, File};

    use super::{ConfigError, KeywardConfig};

    /// File read when no explicit path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "keyward.toml";

    /// Prefix of environment overrides, e.g. `KEYWARD__AUTH__ISSUER`.
    pub const ENV_PREFIX: &str = "KEYWARD";

    /// Loads and validates the configuration.
    ///
    /// Reads `path` (or [`DEFAULT_CONFIG_FILE`]) if it exists, then applies
    /// `KEYWARD__`-prefixed environment variables on top.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if a source cannot be parsed, and the
    /// validation errors of [`KeywardConfig::validate`].
    pub fn load_config(path: Option<&str>) -> Result<KeywardConfig, ConfigError> {
        let mut builder = Config::builder();

        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            tracing::warn!(path = %file.display(), "config file not found, using environment only");
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );

        let merged: KeywardConfig = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;

        merged.validate()?;
        Ok(merged)
    }
}
