//! Redis-backed ledger store.
//!
//! Lets several Turnstile instances share rate windows and usage counters.
//! Keys are namespaced with a configurable prefix; expiry is delegated to
//! Redis itself. Increment-and-arm, the capped increment and
//! decrement-if-present run as Lua scripts so each is a single atomic step on
//! the server.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::fmt;
use tracing::info;

use super::store::{LedgerError, LedgerStore};

const INCREMENT_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

const INCREMENT_CAPPED: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[2]) then
    if redis.call('TTL', KEYS[1]) == -1 then
        redis.call('EXPIRE', KEYS[1], ARGV[1])
    end
    return current
end
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

const DECREMENT_IF_PRESENT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('DECR', KEYS[1])
end
return 0
"#;

/// Configuration for the Redis ledger.
#[derive(Debug, Clone)]
pub struct RedisLedgerConfig {
    /// Prefix prepended to every key (default: "turnstile:")
    pub key_prefix: String,
}

impl Default for RedisLedgerConfig {
    fn default() -> Self {
        Self {
            key_prefix: "turnstile:".to_string(),
        }
    }
}

/// Redis-backed ledger store.
pub struct RedisLedger {
    connection: MultiplexedConnection,
    config: RedisLedgerConfig,
    increment_with_expiry: Script,
    increment_capped: Script,
    decrement_if_present: Script,
}

impl fmt::Debug for RedisLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLedger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisLedger {
    /// Connect with default configuration.
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        Self::connect_with_config(url, RedisLedgerConfig::default()).await
    }

    /// Connect with a custom key prefix.
    pub async fn connect_with_config(
        url: &str,
        config: RedisLedgerConfig,
    ) -> Result<Self, LedgerError> {
        let client = Client::open(url).map_err(unavailable)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;

        info!(prefix = %config.key_prefix, "Connected to Redis ledger");

        Ok(Self {
            connection,
            config,
            increment_with_expiry: Script::new(INCREMENT_WITH_EXPIRY),
            increment_capped: Script::new(INCREMENT_CAPPED),
            decrement_if_present: Script::new(DECREMENT_IF_PRESENT),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

fn unavailable(err: RedisError) -> LedgerError {
    LedgerError::Unavailable(err.to_string())
}

#[async_trait]
impl LedgerStore for RedisLedger {
    async fn increment(&self, key: &str) -> Result<i64, LedgerError> {
        let mut conn = self.connection.clone();
        conn.incr(self.key(key), 1).await.map_err(unavailable)
    }

    async fn decrement(&self, key: &str) -> Result<i64, LedgerError> {
        let mut conn = self.connection.clone();
        self.decrement_if_present
            .key(self.key(key))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, LedgerError> {
        let mut conn = self.connection.clone();
        conn.expire(self.key(key), seconds as i64)
            .await
            .map_err(unavailable)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LedgerError> {
        let mut conn = self.connection.clone();
        conn.get(self.key(key)).await.map_err(unavailable)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<bool, LedgerError> {
        let mut conn = self.connection.clone();
        let key = self.key(key);
        let result: redis::RedisResult<()> = match ttl_seconds {
            Some(seconds) => conn.set_ex(key, value, seconds).await,
            None => conn.set(key, value).await,
        };
        result.map_err(unavailable)?;
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, LedgerError> {
        let mut conn = self.connection.clone();
        let remaining: i64 = conn.ttl(self.key(key)).await.map_err(unavailable)?;
        // -2 is a missing key, -1 a key without expiry
        Ok((remaining > 0).then_some(remaining as u64))
    }

    async fn increment_with_expiry(&self, key: &str, seconds: u64) -> Result<i64, LedgerError> {
        let mut conn = self.connection.clone();
        self.increment_with_expiry
            .key(self.key(key))
            .arg(seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn increment_capped(
        &self,
        key: &str,
        seconds: u64,
        cap: i64,
    ) -> Result<i64, LedgerError> {
        let mut conn = self.connection.clone();
        self.increment_capped
            .key(self.key(key))
            .arg(seconds)
            .arg(cap)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)
    }
}
