//! Request admission: rate limit, quota check, generation, recording.

mod decision;
mod orchestrator;

pub use decision::{Admitted, Rejection};
pub use orchestrator::{Gate, DEFAULT_RECORD_WAIT};
