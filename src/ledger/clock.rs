//! Wall-clock source shared by the ledger and the usage accountant.

use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Port for obtaining the current wall-clock time.
///
/// Window expiry and billing-period boundaries are both computed from this
/// clock, so tests can move time for the whole core at once.
pub trait Clock: Send + Sync + Debug {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// System clock implementation using `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
