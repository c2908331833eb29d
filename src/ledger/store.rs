//! Ledger store trait for abstracting local and distributed counter stores.

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The store could not be reached or refused the operation
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// A value exists but is not what the caller expected
    #[error("corrupt ledger value at {key}: {value}")]
    Corrupt { key: String, value: String },
}

/// Trait for ledger store implementations.
///
/// Implementations must make `increment` and `decrement` linearizable per
/// key: two concurrent increments on the same key always observe distinct
/// results. Expiration is owned by the store; callers never delete keys.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomically add one to the counter at `key`, creating it at zero if
    /// absent, and return the new value.
    async fn increment(&self, key: &str) -> Result<i64, LedgerError>;

    /// Atomically subtract one from an existing counter.
    ///
    /// A missing key is left missing and reported as `0`, so a refund that
    /// races with window expiry never resurrects a counter without a TTL.
    async fn decrement(&self, key: &str) -> Result<i64, LedgerError>;

    /// Set the time-to-live of an existing key. Returns `false` if the key
    /// does not exist.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, LedgerError>;

    /// Read the raw value at `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, LedgerError>;

    /// Write `value` at `key`, optionally with a time-to-live.
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>)
        -> Result<bool, LedgerError>;

    /// Remaining time-to-live of `key` in whole seconds (rounded up).
    ///
    /// Returns `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, LedgerError>;

    /// Increment a counter and arm its expiry on the first increment.
    ///
    /// If a later increment finds the key without a TTL (the arming expire
    /// was lost), the expiry is re-armed so the counter cannot live forever.
    async fn increment_with_expiry(&self, key: &str, seconds: u64) -> Result<i64, LedgerError> {
        let count = self.increment(key).await?;
        if count == 1 || self.ttl(key).await?.is_none() {
            self.expire(key, seconds).await?;
        }
        Ok(count)
    }

    /// Like [`increment_with_expiry`], but leaves a counter that already
    /// reached `cap` untouched and returns its current value.
    ///
    /// The default implementation reads then increments, so concurrent
    /// callers may overshoot `cap`; stores that can do better override it.
    ///
    /// [`increment_with_expiry`]: LedgerStore::increment_with_expiry
    async fn increment_capped(
        &self,
        key: &str,
        seconds: u64,
        cap: i64,
    ) -> Result<i64, LedgerError> {
        let current = self.get_count(key).await?;
        if current < cap {
            return self.increment_with_expiry(key, seconds).await;
        }
        if self.ttl(key).await?.is_none() {
            self.expire(key, seconds).await?;
        }
        Ok(current)
    }

    /// Read a counter, treating a missing key as zero.
    async fn get_count(&self, key: &str) -> Result<i64, LedgerError> {
        match self.get(key).await? {
            None => Ok(0),
            Some(raw) => raw.parse::<i64>().map_err(|_| LedgerError::Corrupt {
                key: key.to_string(),
                value: raw,
            }),
        }
    }
}
