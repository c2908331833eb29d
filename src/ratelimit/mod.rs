//! Rate limiting logic and the quota policy table.

mod key;
mod limiter;
mod policy;

pub use key::LedgerKey;
pub use limiter::{AttemptTicket, RateDecision, RateLimiter, SuccessfulAttempts, WindowStatus};
pub use policy::{PolicyRow, QuotaPolicy, QuotaPolicyTable};
