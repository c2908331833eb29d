//! Ledger store abstraction and implementations.
//!
//! The ledger is the only shared mutable state in the admission core. Every
//! counter the rate limiter and usage accountant keep lives behind the
//! [`LedgerStore`] trait so a distributed cache can be swapped in without
//! touching either of them.

mod clock;
mod memory;
pub mod mocks;
#[cfg(feature = "redis")]
mod redis_ledger;
mod store;

pub use clock::{Clock, SystemClock};
pub use memory::MemoryLedger;
#[cfg(feature = "redis")]
pub use redis_ledger::{RedisLedger, RedisLedgerConfig};
pub use store::{LedgerError, LedgerStore};
