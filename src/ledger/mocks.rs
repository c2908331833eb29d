//! Controllable clock and fault-injecting ledger for tests and simulations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::clock::Clock;
use super::store::{LedgerError, LedgerStore};

/// Mock clock for testing.
///
/// All clones share the same underlying time, so advancing one clone moves
/// every ledger and accountant that holds another.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a mock clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a mock clock frozen at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut current = self.current.lock();
        *current += by;
    }

    /// Jump to a specific instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.lock() = to;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

/// A ledger wrapper that can be told to fail or stall reads and writes.
///
/// Reads are `get` and `ttl`; every other operation counts as a write.
pub struct FaultyLedger<L> {
    inner: L,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    stall: Mutex<Option<(String, Duration)>>,
}

impl<L: LedgerStore> FaultyLedger<L> {
    /// Wrap a healthy ledger.
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            stall: Mutex::new(None),
        }
    }

    /// Toggle read failures.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Toggle write failures.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail every operation.
    pub fn go_down(&self) {
        self.fail_reads(true);
        self.fail_writes(true);
    }

    /// Delay every write to a key starting with `prefix` by `by`.
    pub fn stall_writes(&self, prefix: impl Into<String>, by: Duration) {
        *self.stall.lock() = Some((prefix.into(), by));
    }

    /// The wrapped ledger.
    pub fn inner(&self) -> &L {
        &self.inner
    }

    fn check_read(&self) -> Result<(), LedgerError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }

    async fn check_write(&self, key: &str) -> Result<(), LedgerError> {
        let delay = match &*self.stall.lock() {
            Some((prefix, by)) if key.starts_with(prefix.as_str()) => Some(*by),
            _ => None,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<L: LedgerStore> LedgerStore for FaultyLedger<L> {
    async fn increment(&self, key: &str) -> Result<i64, LedgerError> {
        self.check_write(key).await?;
        self.inner.increment(key).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, LedgerError> {
        self.check_write(key).await?;
        self.inner.decrement(key).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, LedgerError> {
        self.check_write(key).await?;
        self.inner.expire(key, seconds).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LedgerError> {
        self.check_read()?;
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<bool, LedgerError> {
        self.check_write(key).await?;
        self.inner.set(key, value, ttl_seconds).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, LedgerError> {
        self.check_read()?;
        self.inner.ttl(key).await
    }

    async fn increment_with_expiry(&self, key: &str, seconds: u64) -> Result<i64, LedgerError> {
        self.check_write(key).await?;
        self.inner.increment_with_expiry(key, seconds).await
    }

    async fn increment_capped(
        &self,
        key: &str,
        seconds: u64,
        cap: i64,
    ) -> Result<i64, LedgerError> {
        self.check_write(key).await?;
        self.inner.increment_capped(key, seconds, cap).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    #[test]
    fn test_mock_clock_shared_between_clones() {
        let clock = MockClock::starting_now();
        let start = clock.now();
        let other = clock.clone();

        other.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_faulty_ledger_toggles() {
        let ledger = FaultyLedger::new(MemoryLedger::new());

        ledger.increment("k").await.unwrap();
        ledger.fail_writes(true);
        assert!(ledger.increment("k").await.is_err());
        assert_eq!(ledger.get("k").await.unwrap(), Some("1".to_string()));

        ledger.go_down();
        assert!(ledger.get("k").await.is_err());
    }
}
