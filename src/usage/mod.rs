//! Business-period usage accounting.

mod accountant;
mod period;

pub use accountant::{ConsumptionMetadata, Usage, UsageAccountant};
pub use period::UsagePeriod;
