//! In-process ledger backed by a sharded concurrent map.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::store::{LedgerError, LedgerStore};

#[derive(Debug, Clone)]
enum Value {
    Count(i64),
    Text(String),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn counter() -> Self {
        Self {
            value: Value::Count(0),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    fn count(&self, key: &str) -> Result<i64, LedgerError> {
        match &self.value {
            Value::Count(n) => Ok(*n),
            Value::Text(raw) => raw.parse().map_err(|_| LedgerError::Corrupt {
                key: key.to_string(),
                value: raw.clone(),
            }),
        }
    }

    fn render(&self) -> String {
        match &self.value {
            Value::Count(n) => n.to_string(),
            Value::Text(raw) => raw.clone(),
        }
    }
}

/// A ledger store that keeps every key in process memory.
///
/// Each key is guarded by its shard's lock for the duration of a single
/// operation, which makes increments linearizable per key. Expired keys are
/// dropped lazily on access and in bulk by [`MemoryLedger::purge_expired`],
/// which [`MemoryLedger::spawn_sweeper`] runs on a schedule.
#[derive(Debug)]
pub struct MemoryLedger {
    entries: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryLedger {
    /// Create a ledger driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a ledger driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Drop every expired key and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            trace!(removed, "Purged expired ledger keys");
        }
        removed
    }

    /// Purge expired keys every `every` on a background task.
    ///
    /// The task holds only a weak reference and stops once the ledger is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let ledger: Weak<Self> = Arc::downgrade(self);
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = interval(every);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(live) = ledger.upgrade() else {
                    debug!("Memory ledger dropped, stopping sweeper");
                    return;
                };
                live.purge_expired();
            }
        })
    }

    /// Number of keys currently held, including not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_slot(&self, key: &str) -> Option<Slot> {
        let now = self.clock.now();
        self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        self.entries.get(key).map(|slot| slot.value().clone())
    }

    fn add(
        &self,
        key: &str,
        delta: i64,
        arm_expiry: Option<u64>,
        cap: Option<i64>,
    ) -> Result<i64, LedgerError> {
        let now = self.clock.now();
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(Slot::counter);
        if slot.is_expired(now) {
            *slot = Slot::counter();
        }

        let current = slot.count(key)?;
        let next = match cap {
            Some(cap) if current >= cap => current,
            _ => current + delta,
        };
        slot.value = Value::Count(next);

        // A capped call leaves the window where it was
        let opened = next == 1 && next != current;
        if let Some(seconds) = arm_expiry {
            if opened || slot.expires_at.is_none() {
                slot.expires_at = Some(now + ChronoDuration::seconds(seconds as i64));
            }
        }
        Ok(next)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn increment(&self, key: &str) -> Result<i64, LedgerError> {
        self.add(key, 1, None, None)
    }

    async fn decrement(&self, key: &str) -> Result<i64, LedgerError> {
        let now = self.clock.now();
        match self.entries.entry(key.to_string()) {
            Entry::Vacant(_) => Ok(0),
            Entry::Occupied(occupied) if occupied.get().is_expired(now) => {
                occupied.remove();
                Ok(0)
            }
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                let next = slot.count(key)? - 1;
                slot.value = Value::Count(next);
                Ok(next)
            }
        }
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, LedgerError> {
        let now = self.clock.now();
        self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        match self.entries.get_mut(key) {
            Some(mut slot) => {
                slot.expires_at = Some(now + ChronoDuration::seconds(seconds as i64));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.live_slot(key).map(|slot| slot.render()))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<bool, LedgerError> {
        let expires_at =
            ttl_seconds.map(|seconds| self.clock.now() + ChronoDuration::seconds(seconds as i64));
        self.entries.insert(
            key.to_string(),
            Slot {
                value: Value::Text(value.to_string()),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, LedgerError> {
        let now = self.clock.now();
        let remaining = self
            .live_slot(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| (at - now).num_milliseconds())
            .filter(|ms| *ms > 0)
            .map(|ms| ((ms + 999) / 1000) as u64);
        Ok(remaining)
    }

    async fn increment_with_expiry(&self, key: &str, seconds: u64) -> Result<i64, LedgerError> {
        self.add(key, 1, Some(seconds), None)
    }

    async fn increment_capped(
        &self,
        key: &str,
        seconds: u64,
        cap: i64,
    ) -> Result<i64, LedgerError> {
        self.add(key, 1, Some(seconds), Some(cap))
    }
}
