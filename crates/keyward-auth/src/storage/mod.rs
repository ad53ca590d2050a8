//! Key-value store contract for stateful credentials.
//!
//! Opaque tokens, refresh sessions and verification codes all live in an
//! external key-value store. This module defines the minimal interface the
//! credential services need from it:
//!
//! - scalar values with an optional expiry (`set` / `get` / `delete`)
//! - field maps under one key (`field_insert` / `field_get` /
//!   `field_get_all` / `field_delete`)
//!
//! # Implementations
//!
//! - [`memory::InMemoryStore`] - process-local store backed by `DashMap`
//! - `keyward-redis` - Redis backend
//!
//! # Atomicity
//!
//! Every method must be a single atomic store operation. The refresh
//! session store relies on this to mutate one subject's sessions from many
//! concurrent requests without read-modify-write races.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::InMemoryStore;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a key-value store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// The store rejected or failed a command.
    #[error("Command error: {message}")]
    Command {
        /// Description of the command failure.
        message: String,
    },

    /// A scalar operation hit a field map or vice versa.
    ///
    /// The key is not recorded since it may be a live token.
    #[error("Operation against a key holding the wrong kind of value")]
    WrongType,

    /// An internal store error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Command` error.
    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
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
}

/// Time-to-live of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiry {
    /// The record stays until it is deleted.
    Never,
    /// The record is evicted once the duration has elapsed.
    After(Duration),
}

impl Expiry {
    /// Returns the TTL, or `None` for records that never expire.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::After(ttl) => Some(*ttl),
        }
    }
}

impl From<Duration> for Expiry {
    /// A zero duration means "no expiry".
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Self::Never
        } else {
            Self::After(ttl)
        }
    }
}

/// Storage trait for credential records.
///
/// # Example Implementation
///
/// ```ignore
/// use keyward_auth::storage::{Expiry, KeyValueStore, StoreResult};
///
/// struct LoggingStore<S> {
///     inner: S,
/// }
///
/// #[async_trait::async_trait]
/// impl<S: KeyValueStore> KeyValueStore for LoggingStore<S> {
///     async fn set(&self, key: &str, value: &str, expiry: Expiry) -> StoreResult<()> {
///         tracing::trace!(key, "set");
///         self.inner.set(key, value, expiry).await
///     }
///     // ... other methods
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value and expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or `key` holds a field map.
    async fn set(&self, key: &str, value: &str, expiry: Expiry) -> StoreResult<()>;

    /// Reads the scalar value under `key`.
    ///
    /// Returns `None` if the key is missing or its expiry has passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or `key` holds a field map.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Deletes `key`, whatever it holds.
    ///
    /// Returns `true` if a live key was removed. Deleting a missing key is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Inserts `field` into the map under `key` unless it already exists.
    ///
    /// When the field is inserted, `expiry` is applied to the whole map in
    /// the same atomic operation. When the field already exists nothing is
    /// changed and `false` is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or `key` holds a scalar.
    async fn field_insert(
        &self,
        key: &str,
        field: &str,
        value: &str,
        expiry: Expiry,
    ) -> StoreResult<bool>;

    /// Reads one field of the map under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or `key` holds a scalar.
    async fn field_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Reads every field of the map under `key`.
    ///
    /// Returns an empty list if the map does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or `key` holds a scalar.
    async fn field_get_all(&self, key: &str) -> StoreResult<Vec<(String, String)>>;

    /// Removes one field of the map under `key`.
    ///
    /// Returns `true` if the field existed. Other fields are left intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or `key` holds a scalar.
    async fn field_delete(&self, key: &str, field: &str) -> StoreResult<bool>;
}
