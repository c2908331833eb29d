//! The admission gate composing limiter, accountant and gateway.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::decision::{Admitted, Rejection};
use crate::identity::{CallerIdentity, ResourceType, SubscriptionTier};
use crate::ledger::{Clock, LedgerStore, SystemClock};
use crate::ratelimit::{QuotaPolicyTable, RateLimiter, SuccessfulAttempts};
use crate::upstream::{GenerationRequest, UpstreamGateway};
use crate::usage::{ConsumptionMetadata, Usage, UsageAccountant};

/// Default time `handle` gives a consumption record to land before it
/// returns without it.
pub const DEFAULT_RECORD_WAIT: Duration = Duration::from_millis(25);

/// Decides, per request, whether a caller may proceed, and runs the
/// generation when they may.
///
/// Holds no per-request state. One `Gate` is shared by every request
/// handler.
pub struct Gate {
    limiter: Arc<RateLimiter>,
    accountant: Arc<UsageAccountant>,
    gateway: Arc<UpstreamGateway>,
    record_wait: Duration,
}

impl Gate {
    /// Assemble a gate over `ledger` using the system clock and the
    /// default authentication accounting.
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        policies: Arc<QuotaPolicyTable>,
        gateway: UpstreamGateway,
    ) -> Self {
        Self::with_options(
            ledger,
            policies,
            gateway,
            Arc::new(SystemClock::new()),
            SuccessfulAttempts::default(),
        )
    }

    /// Assemble a gate with an explicit clock and authentication mode.
    pub fn with_options(
        ledger: Arc<dyn LedgerStore>,
        policies: Arc<QuotaPolicyTable>,
        gateway: UpstreamGateway,
        clock: Arc<dyn Clock>,
        successful_attempts: SuccessfulAttempts,
    ) -> Self {
        let limiter = Arc::new(
            RateLimiter::new(ledger.clone(), policies.clone())
                .with_successful_attempts(successful_attempts),
        );
        let accountant = Arc::new(UsageAccountant::new(
            ledger,
            policies,
            limiter.clone(),
            clock,
        ));
        Self::from_parts(limiter, accountant, Arc::new(gateway))
    }

    /// Assemble a gate from already-built components.
    pub fn from_parts(
        limiter: Arc<RateLimiter>,
        accountant: Arc<UsageAccountant>,
        gateway: Arc<UpstreamGateway>,
    ) -> Self {
        Self {
            limiter,
            accountant,
            gateway,
            record_wait: DEFAULT_RECORD_WAIT,
        }
    }

    /// Bound how long `handle` waits for the consumption record. Zero
    /// returns as soon as the record is spawned.
    pub fn with_record_wait(mut self, wait: Duration) -> Self {
        self.record_wait = wait;
        self
    }

    /// The rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The usage accountant.
    pub fn accountant(&self) -> &Arc<UsageAccountant> {
        &self.accountant
    }

    /// Admit a request and, if allowed, generate its content.
    ///
    /// Consumption is recorded only when content is returned (including
    /// fallback content). Recording runs on its own task and never holds
    /// the response past the record wait: if the ledger is slow or the
    /// caller stops waiting, the record is still written.
    pub async fn handle(
        &self,
        identity: &CallerIdentity,
        tier: SubscriptionTier,
        resource: ResourceType,
        payload: &GenerationRequest,
    ) -> Result<Admitted, Rejection> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "handle",
            request_id = %request_id,
            identity = %identity,
            tier = %tier,
            resource = %resource
        );

        self.admit_and_generate(request_id, identity, tier, resource, payload)
            .instrument(span)
            .await
    }

    async fn admit_and_generate(
        &self,
        request_id: Uuid,
        identity: &CallerIdentity,
        tier: SubscriptionTier,
        resource: ResourceType,
        payload: &GenerationRequest,
    ) -> Result<Admitted, Rejection> {
        let decision = self.limiter.admit(identity, resource, tier).await;
        if !decision.allowed {
            let retry_after_secs = decision.retry_after_secs.unwrap_or(1);
            info!(retry_after_secs, "Request rate limited");
            return Err(Rejection::RateLimited { retry_after_secs });
        }

        let usage = self.accountant.remaining(identity, resource, tier).await;
        if quota_exhausted(identity, &usage) {
            info!(used = usage.used, limit = usage.limit, "Period quota exceeded");
            return Err(Rejection::QuotaExceeded {
                used: usage.used,
                limit: usage.limit.max(0) as u64,
                reset_at: usage.period_reset_at,
            });
        }

        let generation = match self.gateway.execute(resource, payload).await {
            Ok(generation) => generation,
            Err(e) => {
                warn!(reason = %e.reason, attempts = e.attempts, "Generation failed");
                return Err(e.into());
            }
        };

        let metadata = ConsumptionMetadata {
            request_id: Some(request_id),
            degraded: generation.degraded,
        };
        self.record(identity.clone(), resource, metadata).await;

        // Anonymous usage was read off the window this request already counts in
        let usage = if identity.is_anonymous() {
            usage
        } else {
            Usage {
                used: usage.used.saturating_add(1),
                ..usage
            }
        };

        debug!(
            degraded = generation.degraded,
            attempts = generation.attempts.len(),
            used = usage.used,
            "Request served"
        );

        Ok(Admitted {
            request_id,
            content: generation.content,
            degraded: generation.degraded,
            usage,
        })
    }

    /// Record consumption on a detached task, waiting at most the record
    /// wait for it to finish.
    async fn record(
        &self,
        identity: CallerIdentity,
        resource: ResourceType,
        metadata: ConsumptionMetadata,
    ) {
        let accountant = self.accountant.clone();
        let task = tokio::spawn(
            async move {
                accountant
                    .record_consumption(&identity, resource, metadata)
                    .await;
            }
            .instrument(Span::current()),
        );

        if self.record_wait.is_zero() {
            return;
        }
        match tokio::time::timeout(self.record_wait, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Consumption recording task failed"),
            Err(_) => debug!(
                wait_ms = self.record_wait.as_millis() as u64,
                "Consumption record still pending, responding without it"
            ),
        }
    }

    /// Guard a credential check with the authentication-attempt window.
    ///
    /// `check` is only polled when the attempt is within the window. The
    /// outer result is the admission decision; the inner one is the
    /// credential check's own result, where `Ok` counts as a successful
    /// login.
    pub async fn authenticate<F, T, E>(
        &self,
        identity: &CallerIdentity,
        tier: SubscriptionTier,
        check: F,
    ) -> Result<Result<T, E>, Rejection>
    where
        F: Future<Output = Result<T, E>>,
    {
        let ticket = self.limiter.admit_attempt(identity, tier).await;
        let decision = ticket.decision();

        if !decision.allowed {
            self.limiter.settle(ticket, false).await;
            let retry_after_secs = decision.retry_after_secs.unwrap_or(1);
            info!(identity = %identity, retry_after_secs, "Authentication attempts exhausted");
            return Err(Rejection::RateLimited { retry_after_secs });
        }

        let outcome = check.await;
        self.limiter.settle(ticket, outcome.is_ok()).await;
        Ok(outcome)
    }
}

/// Anonymous usage already includes the request being admitted, since it is
/// read off the window the limiter just incremented.
fn quota_exhausted(identity: &CallerIdentity, usage: &Usage) -> bool {
    if usage.is_unlimited() {
        return false;
    }
    let limit = usage.limit.max(0) as u64;
    if identity.is_anonymous() {
        usage.used > limit
    } else {
        usage.used >= limit
    }
}
