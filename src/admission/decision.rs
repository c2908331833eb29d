//! Caller-facing results of an admission decision.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::upstream::{FailureReason, GatewayError};
use crate::usage::Usage;

/// A request that was admitted and produced content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admitted {
    /// Request id assigned at the start of `handle`
    pub request_id: Uuid,
    /// Generated or fallback text
    pub content: String,
    /// True when the content is a fallback
    pub degraded: bool,
    /// Period usage after this request was recorded
    pub usage: Usage,
}

/// Why a request was not served.
///
/// Messages are safe to show to callers; upstream response bodies never
/// appear here.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum Rejection {
    /// Too many requests in the current window
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The period allowance is used up
    #[error("quota exceeded ({used}/{limit}), resets at {reset_at}")]
    QuotaExceeded {
        used: u64,
        limit: u64,
        reset_at: DateTime<Utc>,
    },

    /// The provider could not produce content and no fallback applied
    #[error("generation failed: {reason}")]
    GenerationFailed {
        reason: FailureReason,
        transient: bool,
    },
}

impl Rejection {
    /// HTTP status an outer surface would map this rejection to.
    pub fn status_code(&self) -> u16 {
        match self {
            Rejection::RateLimited { .. } | Rejection::QuotaExceeded { .. } => 429,
            Rejection::GenerationFailed {
                transient: true, ..
            } => 503,
            Rejection::GenerationFailed { .. } => 502,
        }
    }

    /// Seconds the caller should wait before retrying, when known.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        match self {
            Rejection::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Rejection::QuotaExceeded { reset_at, .. } => {
                Some((*reset_at - now).num_seconds().max(1) as u64)
            }
            Rejection::GenerationFailed { .. } => None,
        }
    }
}

impl From<GatewayError> for Rejection {
    fn from(err: GatewayError) -> Self {
        Rejection::GenerationFailed {
            reason: err.reason,
            transient: err.transient,
        }
    }
}
