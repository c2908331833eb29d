//! Fixed-window rate limiter.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::key::LedgerKey;
use super::policy::QuotaPolicyTable;
use crate::identity::{CallerIdentity, ResourceType, SubscriptionTier};
use crate::ledger::{LedgerError, LedgerStore};

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Seconds until the current window resets, set when rejected
    pub retry_after_secs: Option<u64>,
    /// Window count after this request
    pub count: u64,
    /// Window maximum for the caller's tier
    pub limit: u64,
    /// Set when the ledger was unreachable and the request was let through
    pub failed_open: bool,
}

impl RateDecision {
    fn fail_open(limit: u64) -> Self {
        Self {
            allowed: true,
            retry_after_secs: None,
            count: 0,
            limit,
            failed_open: true,
        }
    }
}

/// Snapshot of a rate window read without incrementing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatus {
    /// Requests counted in the current window
    pub count: u64,
    /// Window maximum for the caller's tier
    pub limit: u64,
    /// Seconds until the window resets, if a window is open
    pub resets_in_secs: Option<u64>,
    /// Configured window length
    pub window_secs: u64,
}

/// What happens to the window slot of an authentication attempt that
/// turns out to be a successful login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessfulAttempts {
    /// Give the slot back; only failed attempts count toward the cap
    #[default]
    Refund,
    /// Keep the slot; every attempt counts
    Count,
}

/// A counted authentication attempt awaiting its credential check.
#[derive(Debug)]
#[must_use = "settle the ticket once the credential check has completed"]
pub struct AttemptTicket {
    key: String,
    decision: RateDecision,
}

impl AttemptTicket {
    /// The rate decision made when the attempt was counted.
    pub fn decision(&self) -> RateDecision {
        self.decision
    }
}

/// The rate limiter that guards every request.
///
/// Counters live in the ledger; the limiter itself holds no mutable state
/// and can be shared freely across tasks.
pub struct RateLimiter {
    /// Counter storage
    ledger: Arc<dyn LedgerStore>,
    /// Per `(resource, tier)` window limits
    policies: Arc<QuotaPolicyTable>,
    /// Authentication success accounting mode
    successful_attempts: SuccessfulAttempts,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(ledger: Arc<dyn LedgerStore>, policies: Arc<QuotaPolicyTable>) -> Self {
        Self {
            ledger,
            policies,
            successful_attempts: SuccessfulAttempts::default(),
        }
    }

    /// Choose how successful logins are accounted.
    pub fn with_successful_attempts(mut self, mode: SuccessfulAttempts) -> Self {
        self.successful_attempts = mode;
        self
    }

    /// The policy table this limiter reads.
    pub fn policies(&self) -> &Arc<QuotaPolicyTable> {
        &self.policies
    }

    /// Count a request and decide whether it is within the caller's window.
    ///
    /// Every call increments the window, including calls that end up
    /// rejected. If the ledger is unreachable the request is allowed.
    pub async fn admit(
        &self,
        identity: &CallerIdentity,
        resource: ResourceType,
        tier: SubscriptionTier,
    ) -> RateDecision {
        let key = LedgerKey::rate_window(identity, resource).to_string_key();
        self.admit_key(&key, resource, tier).await
    }

    async fn admit_key(
        &self,
        key: &str,
        resource: ResourceType,
        tier: SubscriptionTier,
    ) -> RateDecision {
        let policy = self.policies.lookup(resource, tier);

        trace!(key = %key, tier = %tier, limit = policy.max_in_window, "Checking rate limit");

        // The first rejected request is counted, later ones are not
        let cap = i64::try_from(policy.max_in_window)
            .map_or(i64::MAX, |max| max.saturating_add(1));
        let count = match self
            .ledger
            .increment_capped(key, policy.window_secs, cap)
            .await
        {
            Ok(count) => count.max(0) as u64,
            Err(e) => {
                warn!(key = %key, error = %e, "Ledger unavailable, rate limiter failing open");
                return RateDecision::fail_open(policy.max_in_window);
            }
        };

        if count <= policy.max_in_window {
            return RateDecision {
                allowed: true,
                retry_after_secs: None,
                count,
                limit: policy.max_in_window,
                failed_open: false,
            };
        }

        let retry_after = match self.ledger.ttl(key).await {
            Ok(Some(secs)) => secs.max(1),
            Ok(None) => policy.window_secs,
            Err(e) => {
                debug!(key = %key, error = %e, "Could not read window TTL");
                policy.window_secs
            }
        };

        debug!(
            key = %key,
            count = count,
            limit = policy.max_in_window,
            retry_after_secs = retry_after,
            "Rate limit exceeded"
        );

        RateDecision {
            allowed: false,
            retry_after_secs: Some(retry_after),
            count,
            limit: policy.max_in_window,
            failed_open: false,
        }
    }

    /// Read a caller's current window without counting a request.
    pub async fn peek(
        &self,
        identity: &CallerIdentity,
        resource: ResourceType,
        tier: SubscriptionTier,
    ) -> Result<WindowStatus, LedgerError> {
        let policy = self.policies.lookup(resource, tier);
        let key = LedgerKey::rate_window(identity, resource).to_string_key();

        let count = self.ledger.get_count(&key).await?.max(0) as u64;
        let resets_in_secs = self.ledger.ttl(&key).await?;

        Ok(WindowStatus {
            count,
            limit: policy.max_in_window,
            resets_in_secs,
            window_secs: policy.window_secs,
        })
    }

    /// Count an authentication attempt before its credentials are checked.
    ///
    /// Callers must only run the credential check when the ticket's
    /// decision is allowed, and must pass the ticket to [`settle`] after.
    ///
    /// [`settle`]: RateLimiter::settle
    pub async fn admit_attempt(
        &self,
        identity: &CallerIdentity,
        tier: SubscriptionTier,
    ) -> AttemptTicket {
        let resource = ResourceType::AuthenticationAttempt;
        let key = LedgerKey::rate_window(identity, resource).to_string_key();
        let decision = self.admit_key(&key, resource, tier).await;
        AttemptTicket { key, decision }
    }

    /// Close out an authentication attempt.
    ///
    /// Under [`SuccessfulAttempts::Refund`] a successful login gives its
    /// window slot back, so a caller with a few failed attempts is never
    /// locked out by logging in correctly.
    pub async fn settle(&self, ticket: AttemptTicket, succeeded: bool) {
        let counted = ticket.decision.allowed && !ticket.decision.failed_open;
        if !(succeeded && counted && self.successful_attempts == SuccessfulAttempts::Refund) {
            return;
        }

        match self.ledger.decrement(&ticket.key).await {
            Ok(remaining) => trace!(key = %ticket.key, remaining, "Refunded successful attempt"),
            Err(e) => warn!(key = %ticket.key, error = %e, "Failed to refund successful attempt"),
        }
    }
}
