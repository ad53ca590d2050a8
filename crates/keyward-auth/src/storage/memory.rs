//! In-memory key-value store.
//!
//! Backed by a sharded `DashMap`. Every operation runs under the shard lock
//! of its key, so field-map mutations are atomic with respect to each other
//! just like their Redis counterparts. Expired entries are dropped lazily
//! when they are next touched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use super::{Expiry, KeyValueStore, StoreError, StoreResult};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum StoredValue {
    Scalar(String),
    Map(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Option<OffsetDateTime>,
}

impl StoredEntry {
    fn empty_map() -> Self {
        Self {
            value: StoredValue::Map(HashMap::new()),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn is_empty_map(&self) -> bool {
        matches!(&self.value, StoredValue::Map(fields) if fields.is_empty())
    }
}

fn deadline(now: OffsetDateTime, expiry: Expiry) -> StoreResult<Option<OffsetDateTime>> {
    let Some(ttl) = expiry.ttl() else {
        return Ok(None);
    };

    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
        .map(Some)
        .ok_or_else(|| StoreError::command(format!("expiry out of range: {ttl:?}")))
}

/// Process-local [`KeyValueStore`].
///
/// Cloning is cheap; clones share the same data.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    data: Arc<DashMap<String, StoredEntry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Creates an empty store that expires entries by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store that expires entries by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Returns the number of keys, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.data.len())
    }

    fn evict_if_expired(&self, key: &str, now: OffsetDateTime) {
        self.data.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn set(&self, key: &str, value: &str, expiry: Expiry) -> StoreResult<()> {
        let expires_at = deadline(self.clock.now(), expiry)?;
        self.data.insert(
            key.to_string(),
            StoredEntry {
                value: StoredValue::Scalar(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now();
        let result = match self.data.get(key) {
            None => return Ok(None),
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => match &entry.value {
                StoredValue::Scalar(value) => Some(Ok(value.clone())),
                StoredValue::Map(_) => Some(Err(StoreError::WrongType)),
            },
        };

        match result {
            Some(value) => value.map(Some),
            None => {
                self.evict_if_expired(key, now);
                Ok(None)
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        Ok(self
            .data
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn field_insert(
        &self,
        key: &str,
        field: &str,
        value: &str,
        expiry: Expiry,
    ) -> StoreResult<bool> {
        let now = self.clock.now();
        let expires_at = deadline(now, expiry)?;
        let mut slot = self
            .data
            .entry(key.to_string())
            .or_insert_with(StoredEntry::empty_map);
        let entry: &mut StoredEntry = &mut slot;

        if entry.is_expired(now) {
            *entry = StoredEntry::empty_map();
        }

        let StoredValue::Map(fields) = &mut entry.value else {
            return Err(StoreError::WrongType);
        };

        if fields.contains_key(field) {
            return Ok(false);
        }

        fields.insert(field.to_string(), value.to_string());
        entry.expires_at = expires_at;
        Ok(true)
    }

    async fn field_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now();
        let result = match self.data.get(key) {
            None => return Ok(None),
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => match &entry.value {
                StoredValue::Map(fields) => Some(Ok(fields.get(field).cloned())),
                StoredValue::Scalar(_) => Some(Err(StoreError::WrongType)),
            },
        };

        match result {
            Some(value) => value,
            None => {
                self.evict_if_expired(key, now);
                Ok(None)
            }
        }
    }

    async fn field_get_all(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        let now = self.clock.now();
        let result = match self.data.get(key) {
            None => return Ok(Vec::new()),
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => match &entry.value {
                StoredValue::Map(fields) => Some(Ok(fields
                    .iter()
                    .map(|(f, v)| (f.clone(), v.clone()))
                    .collect())),
                StoredValue::Scalar(_) => Some(Err(StoreError::WrongType)),
            },
        };

        match result {
            Some(fields) => fields,
            None => {
                self.evict_if_expired(key, now);
                Ok(Vec::new())
            }
        }
    }

    async fn field_delete(&self, key: &str, field: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        let (removed, now_empty) = match self.data.get_mut(key) {
            None => return Ok(false),
            Some(mut slot) => {
                let entry: &mut StoredEntry = &mut slot;
                if entry.is_expired(now) {
                    (false, false)
                } else {
                    let StoredValue::Map(fields) = &mut entry.value else {
                        return Err(StoreError::WrongType);
                    };
                    let removed = fields.remove(field).is_some();
                    (removed, fields.is_empty())
                }
            }
        };

        if now_empty {
            // Re-checked under the shard lock in case a field was added meanwhile.
            self.data.remove_if(key, |_, entry| entry.is_empty_map());
        } else if !removed {
            self.evict_if_expired(key, now);
        }

        Ok(removed)
    }
}
