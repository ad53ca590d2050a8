//! # keyward-redis
//!
//! Redis implementation of [`KeyValueStore`] for sharing credentials
//! between service instances.
//!
//! | Operation | Redis |
//! |-----------|-------|
//! | `set` | `SET` / `SET PX` |
//! | `get` | `GET` |
//! | `delete` | `DEL` |
//! | `field_insert` | Lua: `HSETNX` then `PEXPIRE` / `PERSIST` |
//! | `field_get` | `HGET` |
//! | `field_get_all` | `HGETALL` |
//! | `field_delete` | `HDEL` |
//!
//! Opaque tokens are used as keys verbatim, so keys are never logged.
//!
//! ## Example
//!
//! ```ignore
//! use keyward_auth::{AuthManager, KeywardConfig};
//! use keyward_redis::RedisStore;
//!
//! let config = keyward_auth::config::loader::load_config(None)?;
//! let store = RedisStore::connect(&config.redis).await?;
//! let manager = AuthManager::new(config.auth, Arc::new(store))?;
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolConfig, Runtime};
use keyward_auth::RedisConfig;
use keyward_auth::storage::{Expiry, KeyValueStore, StoreError, StoreResult};
use redis::{AsyncCommands, RedisError, Script};

/// Inserts a hash field if absent and, only when it was inserted, applies
/// the TTL (milliseconds, `0` = none) to the whole hash.
const FIELD_INSERT_SCRIPT: &str = r"
local inserted = redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2])
if inserted == 1 then
    if ARGV[3] == '0' then
        redis.call('PERSIST', KEYS[1])
    else
        redis.call('PEXPIRE', KEYS[1], ARGV[3])
    end
end
return inserted
";

/// Creates a connection pool from configuration.
///
/// No connection is opened until the pool is first used.
///
/// # Errors
///
/// Returns `Connection` if the URL is invalid.
pub fn create_pool(config: &RedisConfig) -> StoreResult<Pool> {
    let timeout = config.timeout();

    let mut pool_config = PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    redis_config.pool = Some(pool_config);

    redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| StoreError::connection(format!("failed to create redis pool: {e}")))
}

/// [`KeyValueStore`] backed by a Redis connection pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    field_insert: Script,
}

impl RedisStore {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            field_insert: Script::new(FIELD_INSERT_SCRIPT),
        }
    }

    /// Creates a pool from `config` and checks that Redis is reachable.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the pool cannot be created or Redis does not
    /// answer a `PING`.
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        tracing::info!(url = %config.url, "Connecting to Redis");

        let store = Self::new(create_pool(config)?);
        let mut conn = store.conn().await?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_error(e, "ping"))?;

        tracing::info!("Connected to Redis");
        Ok(store)
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> StoreResult<Connection> {
        self.pool.get().await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to get Redis connection");
            StoreError::connection(e.to_string())
        })
    }
}

/// Millisecond TTL argument; Redis rejects a zero expiry.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn map_error(err: RedisError, op: &'static str) -> StoreError {
    if err.code() == Some("WRONGTYPE") {
        return StoreError::WrongType;
    }

    tracing::warn!(error = %err, op, "Redis command failed");
    if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
        StoreError::connection(err.to_string())
    } else {
        StoreError::command(err.to_string())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set(&self, key: &str, value: &str, expiry: Expiry) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let result = match expiry {
            Expiry::Never => conn.set::<_, _, ()>(key, value).await,
            Expiry::After(ttl) => conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl)).await,
        };
        result.map_err(|e| map_error(e, "set"))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| map_error(e, "get"))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await.map_err(|e| map_error(e, "delete"))?;
        Ok(removed > 0)
    }

    async fn field_insert(
        &self,
        key: &str,
        field: &str,
        value: &str,
        expiry: Expiry,
    ) -> StoreResult<bool> {
        let ttl_ms = expiry.ttl().map_or(0, ttl_millis);

        let mut invocation = self.field_insert.prepare_invoke();
        invocation.key(key).arg(field).arg(value).arg(ttl_ms);

        let mut conn = self.conn().await?;
        let inserted: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_error(e, "field_insert"))?;
        Ok(inserted == 1)
    }

    async fn field_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.hget::<_, _, Option<String>>(key, field)
            .await
            .map_err(|e| map_error(e, "field_get"))
    }

    async fn field_get_all(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| map_error(e, "field_get_all"))?;
        Ok(fields.into_iter().collect())
    }

    async fn field_delete(&self, key: &str, field: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .hdel(key, field)
            .await
            .map_err(|e| map_error(e, "field_delete"))?;
        Ok(removed > 0)
    }
}
