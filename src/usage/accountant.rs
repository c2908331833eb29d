//! Period usage accounting.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::period::UsagePeriod;
use crate::identity::{CallerIdentity, ResourceType, SubscriptionTier};
use crate::ledger::{Clock, LedgerStore};
use crate::ratelimit::{LedgerKey, QuotaPolicyTable, RateLimiter};

/// Consumption against a caller's period allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    /// Units consumed in the current period
    pub used: u64,
    /// Period allowance, or [`Usage::UNLIMITED`]
    pub limit: i64,
    /// When the current period ends
    pub period_reset_at: DateTime<Utc>,
}

impl Usage {
    /// Limit value meaning "no allowance applies".
    pub const UNLIMITED: i64 = -1;

    fn unlimited(used: u64, period_reset_at: DateTime<Utc>) -> Self {
        Self {
            used,
            limit: Self::UNLIMITED,
            period_reset_at,
        }
    }

    /// Whether no period allowance applies.
    pub fn is_unlimited(&self) -> bool {
        self.limit == Self::UNLIMITED
    }

    /// Units left in the period; `None` when unlimited.
    pub fn remaining(&self) -> Option<u64> {
        (!self.is_unlimited()).then(|| (self.limit as u64).saturating_sub(self.used))
    }
}

/// Details attached to a recorded consumption event.
#[derive(Debug, Clone, Default)]
pub struct ConsumptionMetadata {
    /// Request that produced the consumption
    pub request_id: Option<Uuid>,
    /// Whether the content came from a fallback
    pub degraded: bool,
}

/// Tracks business-period consumption for authenticated callers.
///
/// Independent of the rate limiter's burst windows: the limiter caps a
/// minute, the accountant caps a month. Anonymous callers have no stored
/// counter; their allowance is read off the current rate window.
pub struct UsageAccountant {
    ledger: Arc<dyn LedgerStore>,
    policies: Arc<QuotaPolicyTable>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl UsageAccountant {
    /// Create a new accountant.
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        policies: Arc<QuotaPolicyTable>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            policies,
            limiter,
            clock,
        }
    }

    /// Report how much of the period allowance a caller has used.
    ///
    /// Fails open: if the ledger cannot be read the caller is reported as
    /// unlimited and the fault is logged.
    pub async fn remaining(
        &self,
        identity: &CallerIdentity,
        resource: ResourceType,
        tier: SubscriptionTier,
    ) -> Usage {
        let now = self.clock.now();
        let policy = self.policies.lookup(resource, tier);

        if identity.is_anonymous() {
            return self.anonymous_remaining(identity, resource, tier, now).await;
        }

        let period = UsagePeriod::containing(now);
        let limit = match (tier, policy.period_limit) {
            (SubscriptionTier::Enterprise, _) | (_, None) => Usage::UNLIMITED,
            (_, Some(limit)) => limit as i64,
        };

        let key = LedgerKey::usage_period(identity, resource, &period.id).to_string_key();
        match self.ledger.get_count(&key).await {
            Ok(used) => Usage {
                used: used.max(0) as u64,
                limit,
                period_reset_at: period.resets_at,
            },
            Err(e) => {
                warn!(key = %key, error = %e, "Ledger unavailable, usage check failing open");
                Usage::unlimited(0, period.resets_at)
            }
        }
    }

    async fn anonymous_remaining(
        &self,
        identity: &CallerIdentity,
        resource: ResourceType,
        tier: SubscriptionTier,
        now: DateTime<Utc>,
    ) -> Usage {
        let allowance = self
            .policies
            .lookup(resource, SubscriptionTier::Anonymous)
            .period_limit;

        match self.limiter.peek(identity, resource, tier).await {
            Ok(window) => {
                let resets_in = window.resets_in_secs.unwrap_or(window.window_secs);
                let reset_at = now + ChronoDuration::seconds(resets_in as i64);
                match allowance {
                    Some(limit) => Usage {
                        used: window.count,
                        limit: limit as i64,
                        period_reset_at: reset_at,
                    },
                    None => Usage::unlimited(window.count, reset_at),
                }
            }
            Err(e) => {
                warn!(
                    identity = %identity,
                    error = %e,
                    "Ledger unavailable, anonymous usage check failing open"
                );
                Usage::unlimited(0, now)
            }
        }
    }

    /// Record one successful unit of consumption.
    ///
    /// Never fails: a ledger error is logged and dropped, because a caller
    /// who received content must not be punished for our bookkeeping.
    pub async fn record_consumption(
        &self,
        identity: &CallerIdentity,
        resource: ResourceType,
        metadata: ConsumptionMetadata,
    ) {
        if identity.is_anonymous() {
            debug!(
                identity = %identity,
                resource = %resource,
                "Anonymous consumption not recorded"
            );
            return;
        }

        let now = self.clock.now();
        let period = UsagePeriod::containing(now);
        let key = LedgerKey::usage_period(identity, resource, &period.id).to_string_key();

        match self
            .ledger
            .increment_with_expiry(&key, period.counter_ttl_secs(now))
            .await
        {
            Ok(used) => debug!(
                key = %key,
                used,
                degraded = metadata.degraded,
                request_id = ?metadata.request_id,
                "Recorded consumption"
            ),
            Err(e) => warn!(
                key = %key,
                error = %e,
                request_id = ?metadata.request_id,
                "Failed to record consumption"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mocks::{FaultyLedger, MockClock};
    use crate::ledger::MemoryLedger;
    use chrono::TimeZone;
    use std::time::Duration;
    use tracing_test::traced_test;

    struct Fixture {
        accountant: UsageAccountant,
        limiter: Arc<RateLimiter>,
        ledger: Arc<FaultyLedger<MemoryLedger>>,
        clock: MockClock,
    }

    fn fixture() -> Fixture {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap());
        let ledger = Arc::new(FaultyLedger::new(MemoryLedger::with_clock(Arc::new(
            clock.clone(),
        ))));
        let policies = Arc::new(QuotaPolicyTable::defaults());
        let limiter = Arc::new(RateLimiter::new(ledger.clone(), policies.clone()));
        let accountant = UsageAccountant::new(
            ledger.clone(),
            policies,
            limiter.clone(),
            Arc::new(clock.clone()),
        );
        Fixture {
            accountant,
            limiter,
            ledger,
            clock,
        }
    }

    #[tokio::test]
    async fn test_fresh_user_has_zero_usage() {
        let f = fixture();
        let usage = f
            .accountant
            .remaining(
                &CallerIdentity::user("a"),
                ResourceType::TextGeneration,
                SubscriptionTier::Free,
            )
            .await;

        assert_eq!(usage.used, 0);
        assert_eq!(usage.limit, 50);
        assert_eq!(usage.remaining(), Some(50));
        assert_eq!(
            usage.period_reset_at,
            Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_record_consumption_increments() {
        let f = fixture();
        let user = CallerIdentity::user("a");

        for _ in 0..3 {
            f.accountant
                .record_consumption(
                    &user,
                    ResourceType::TextGeneration,
                    ConsumptionMetadata::default(),
                )
                .await;
        }

        let usage = f
            .accountant
            .remaining(&user, ResourceType::TextGeneration, SubscriptionTier::Pro)
            .await;
        assert_eq!(usage.used, 3);
        assert_eq!(usage.limit, 1000);
    }

    #[tokio::test]
    async fn test_usage_resets_when_period_rolls_over() {
        let f = fixture();
        let user = CallerIdentity::user("a");

        f.accountant
            .record_consumption(&user, ResourceType::TextGeneration, ConsumptionMetadata::default())
            .await;
        f.clock.set(Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 1).unwrap());

        let usage = f
            .accountant
            .remaining(&user, ResourceType::TextGeneration, SubscriptionTier::Free)
            .await;
        assert_eq!(usage.used, 0);
        assert_eq!(
            usage.period_reset_at,
            Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_enterprise_is_unlimited() {
        let f = fixture();
        let user = CallerIdentity::user("big-co");

        for _ in 0..5 {
            f.accountant
                .record_consumption(
                    &user,
                    ResourceType::TextGeneration,
                    ConsumptionMetadata::default(),
                )
                .await;
        }

        let usage = f
            .accountant
            .remaining(&user, ResourceType::TextGeneration, SubscriptionTier::Enterprise)
            .await;
        assert!(usage.is_unlimited());
        assert_eq!(usage.used, 5);
        assert_eq!(usage.remaining(), None);
    }

    #[tokio::test]
    async fn test_unmetered_resource_is_unlimited() {
        let f = fixture();
        let usage = f
            .accountant
            .remaining(&CallerIdentity::user("a"), ResourceType::GenericApi, SubscriptionTier::Free)
            .await;
        assert!(usage.is_unlimited());
    }

    #[tokio::test]
    async fn test_anonymous_usage_reads_rate_window() {
        let f = fixture();
        let anon = CallerIdentity::anonymous("203.0.113.9");

        for _ in 0..2 {
            f.limiter
                .admit(&anon, ResourceType::TextGeneration, SubscriptionTier::Anonymous)
                .await;
        }
        f.clock.advance(Duration::from_secs(20));

        let usage = f
            .accountant
            .remaining(&anon, ResourceType::TextGeneration, SubscriptionTier::Anonymous)
            .await;
        assert_eq!(usage.used, 2);
        assert_eq!(usage.limit, 5);
        assert_eq!(
            usage.period_reset_at,
            Utc.with_ymd_and_hms(2026, 10, 16, 9, 1, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_anonymous_consumption_not_persisted() {
        let f = fixture();
        let anon = CallerIdentity::anonymous("203.0.113.9");

        f.accountant
            .record_consumption(&anon, ResourceType::TextGeneration, ConsumptionMetadata::default())
            .await;
        assert!(f.ledger.inner().is_empty());
    }

    #[tokio::test]
    async fn test_remaining_fails_open() {
        let f = fixture();
        f.ledger.fail_reads(true);

        let usage = f
            .accountant
            .remaining(
                &CallerIdentity::user("a"),
                ResourceType::TextGeneration,
                SubscriptionTier::Free,
            )
            .await;
        assert!(usage.is_unlimited());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_recording_failure_is_swallowed_and_logged() {
        let f = fixture();
        let user = CallerIdentity::user("a");
        f.ledger.fail_writes(true);

        f.accountant
            .record_consumption(&user, ResourceType::TextGeneration, ConsumptionMetadata::default())
            .await;

        assert!(logs_contain("Failed to record consumption"));
        f.ledger.fail_writes(false);
        let usage = f
            .accountant
            .remaining(&user, ResourceType::TextGeneration, SubscriptionTier::Free)
            .await;
        assert_eq!(usage.used, 0);
    }
}
