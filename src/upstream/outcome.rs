//! Classification of provider call outcomes.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::provider::ProviderError;

/// Why an upstream attempt failed, stripped of any provider body text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Network or connection failure
    Transport,
    /// The attempt exceeded its time budget
    Timeout,
    /// HTTP 429 from the provider
    ProviderRateLimited,
    /// HTTP 5xx from the provider
    ServerError { status: u16 },
    /// HTTP 401/403: our credentials are wrong
    Unauthorized { status: u16 },
    /// Any other HTTP 4xx: the request itself was rejected
    ClientError { status: u16 },
    /// HTTP 2xx with an absent or unusable payload
    MalformedPayload,
    /// The attempt task died before producing a result
    Aborted,
}

impl FailureReason {
    /// Whether the gateway may retry after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureReason::Transport
                | FailureReason::Timeout
                | FailureReason::ProviderRateLimited
                | FailureReason::ServerError { .. }
        )
    }

    /// Whether a caller could reasonably try again later.
    ///
    /// False for credential and request problems, which will fail the same
    /// way until configuration changes.
    pub fn is_transient(&self) -> bool {
        self.is_retryable() || matches!(self, FailureReason::MalformedPayload)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport => f.write_str("upstream unreachable"),
            FailureReason::Timeout => f.write_str("upstream timed out"),
            FailureReason::ProviderRateLimited => f.write_str("upstream rate limited"),
            FailureReason::ServerError { status } => write!(f, "upstream error ({})", status),
            FailureReason::Unauthorized { status } => {
                write!(f, "upstream rejected credentials ({})", status)
            }
            FailureReason::ClientError { status } => {
                write!(f, "upstream rejected request ({})", status)
            }
            FailureReason::MalformedPayload => f.write_str("upstream returned malformed payload"),
            FailureReason::Aborted => f.write_str("upstream attempt aborted"),
        }
    }
}

/// Tagged outcome of one attempt, consumed by the retry driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(String),
    Retryable(FailureReason),
    Terminal(FailureReason),
}

impl AttemptOutcome {
    /// Classify the result of one provider call.
    pub fn classify(result: Result<String, ProviderError>) -> Self {
        let reason = match result {
            Ok(content) if content.trim().is_empty() => FailureReason::MalformedPayload,
            Ok(content) => return AttemptOutcome::Success(content),
            Err(ProviderError::Transport(_)) => FailureReason::Transport,
            Err(ProviderError::Timeout(_)) => FailureReason::Timeout,
            Err(ProviderError::MalformedPayload(_)) => FailureReason::MalformedPayload,
            Err(ProviderError::Status { status, .. }) => Self::classify_status(status),
        };

        if reason.is_retryable() {
            AttemptOutcome::Retryable(reason)
        } else {
            AttemptOutcome::Terminal(reason)
        }
    }

    fn classify_status(status: u16) -> FailureReason {
        match status {
            429 => FailureReason::ProviderRateLimited,
            401 | 403 => FailureReason::Unauthorized { status },
            400..=499 => FailureReason::ClientError { status },
            500..=599 => FailureReason::ServerError { status },
            // A non-error status reported as failure breaks the provider contract
            _ => FailureReason::MalformedPayload,
        }
    }

    /// The failure reason, if this outcome is a failure.
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            AttemptOutcome::Success(_) => None,
            AttemptOutcome::Retryable(reason) | AttemptOutcome::Terminal(reason) => Some(*reason),
        }
    }

    fn kind(&self) -> AttemptKind {
        match self {
            AttemptOutcome::Success(_) => AttemptKind::Success,
            AttemptOutcome::Retryable(_) => AttemptKind::RetryableFailure,
            AttemptOutcome::Terminal(_) => AttemptKind::TerminalFailure,
        }
    }
}

/// Coarse result of an attempt, for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    Success,
    RetryableFailure,
    TerminalFailure,
}

/// Record of one attempt inside a single gateway invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpstreamAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    /// Time spent in the attempt, excluding backoff
    pub elapsed: Duration,
    /// How the attempt ended
    pub outcome: AttemptKind,
    /// Why it failed, if it did
    pub reason: Option<FailureReason>,
}

impl UpstreamAttempt {
    pub(crate) fn new(attempt: u32, elapsed: Duration, outcome: &AttemptOutcome) -> Self {
        Self {
            attempt,
            elapsed,
            outcome: outcome.kind(),
            reason: outcome.reason(),
        }
    }
}
