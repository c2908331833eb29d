//! Resilient wrapper around a single upstream generation call.
//!
//! Each invocation moves through `Attempting → Success`, or
//! `Attempting → Retrying → Attempting` for retryable failures, and ends in
//! `Success`, an exhausted failure or a terminal failure. Failures are then
//! either turned into fallback content or surfaced as a [`GatewayError`].

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::fallback::FallbackCatalog;
use super::outcome::{AttemptOutcome, FailureReason, UpstreamAttempt};
use super::provider::{GenerationProvider, GenerationRequest, ProviderError};
use crate::identity::ResourceType;

/// Default number of attempts per invocation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
/// Default backoff step; the n-th retry waits `n * base_delay`.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
/// Default per-attempt time budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry and timeout settings for the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Time budget for a single attempt
    pub timeout: Duration,
    /// Attempts per invocation, including the first
    pub max_attempts: u32,
    /// Linear backoff step
    pub base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

/// Content produced by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// The generated or fallback text
    pub content: String,
    /// True when `content` came from the fallback catalog
    pub degraded: bool,
    /// Every attempt made for this invocation
    pub attempts: Vec<UpstreamAttempt>,
}

/// The gateway could not produce content and no fallback applied.
#[derive(Debug, Clone, Error)]
#[error("generation failed after {attempts} attempt(s): {reason}")]
pub struct GatewayError {
    /// Classified cause of the last failure
    pub reason: FailureReason,
    /// Whether retrying later may succeed
    pub transient: bool,
    /// Number of attempts made
    pub attempts: u32,
}

/// Executes generation calls with timeout, retry and fallback.
pub struct UpstreamGateway {
    provider: Arc<dyn GenerationProvider>,
    fallbacks: FallbackCatalog,
    config: GatewayConfig,
}

impl UpstreamGateway {
    /// Create a gateway with default settings and no fallbacks.
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self {
            provider,
            fallbacks: FallbackCatalog::new(),
            config: GatewayConfig::default(),
        }
    }

    /// Use the given retry and timeout settings.
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Use the given fallback catalog.
    pub fn with_fallbacks(mut self, fallbacks: FallbackCatalog) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// The gateway's settings.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Execute a generation with the configured attempt budget.
    pub async fn execute(
        &self,
        resource: ResourceType,
        request: &GenerationRequest,
    ) -> Result<Generation, GatewayError> {
        self.execute_with_attempts(resource, request, self.config.max_attempts)
            .await
    }

    /// Execute a generation with an explicit attempt budget.
    pub async fn execute_with_attempts(
        &self,
        resource: ResourceType,
        request: &GenerationRequest,
        max_attempts: u32,
    ) -> Result<Generation, GatewayError> {
        let max_attempts = max_attempts.max(1);
        let mut attempts = Vec::with_capacity(max_attempts as usize);

        let reason = loop {
            let attempt = attempts.len() as u32 + 1;
            let started = Instant::now();
            let outcome = self.attempt(request).await;
            attempts.push(UpstreamAttempt::new(attempt, started.elapsed(), &outcome));

            match outcome {
                AttemptOutcome::Success(content) => {
                    debug!(resource = %resource, attempt, "Upstream attempt succeeded");
                    return Ok(Generation {
                        content,
                        degraded: false,
                        attempts,
                    });
                }
                AttemptOutcome::Retryable(reason) if attempt < max_attempts => {
                    let delay = self.config.base_delay * attempt;
                    warn!(
                        resource = %resource,
                        attempt,
                        reason = %reason,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                AttemptOutcome::Retryable(reason) => {
                    warn!(
                        resource = %resource,
                        attempt,
                        reason = %reason,
                        "Upstream attempts exhausted"
                    );
                    break reason;
                }
                AttemptOutcome::Terminal(reason) => {
                    warn!(
                        resource = %resource,
                        attempt,
                        reason = %reason,
                        "Upstream attempt failed terminally"
                    );
                    break reason;
                }
            }
        };

        if let Some(content) = self.fallbacks.get(resource) {
            info!(resource = %resource, reason = %reason, "Serving fallback content");
            return Ok(Generation {
                content: content.to_string(),
                degraded: true,
                attempts,
            });
        }

        Err(GatewayError {
            reason,
            transient: reason.is_transient(),
            attempts: attempts.len() as u32,
        })
    }

    /// Run one provider call on its own task.
    ///
    /// If the caller's future is dropped mid-call, the task still runs to
    /// completion and its result is discarded.
    async fn attempt(&self, request: &GenerationRequest) -> AttemptOutcome {
        let provider = self.provider.clone();
        let request = request.clone();
        let timeout = self.config.timeout;

        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, provider.generate(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout)),
            }
        });

        match handle.await {
            Ok(result) => AttemptOutcome::classify(result),
            Err(e) => {
                warn!(error = %e, "Upstream attempt task aborted");
                AttemptOutcome::Terminal(FailureReason::Aborted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::mocks::ScriptedProvider;
    use crate::upstream::AttemptKind;

    fn status(code: u16) -> Result<String, ProviderError> {
        Err(ProviderError::Status {
            status: code,
            body: String::new(),
        })
    }

    fn gateway(provider: Arc<ScriptedProvider>) -> UpstreamGateway {
        UpstreamGateway::new(provider)
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("write a haiku")
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let provider = Arc::new(ScriptedProvider::always_ok("leaves fall"));
        let generation = gateway(provider.clone())
            .execute(ResourceType::TextGeneration, &request())
            .await
            .unwrap();

        assert_eq!(generation.content, "leaves fall");
        assert!(!generation.degraded);
        assert_eq!(generation.attempts.len(), 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_with_linear_backoff() {
        let provider = Arc::new(ScriptedProvider::new(
            vec![status(503), status(429)],
            Ok("ok".to_string()),
        ));
        let started = Instant::now();

        let generation = gateway(provider.clone())
            .execute_with_attempts(ResourceType::TextGeneration, &request(), 3)
            .await
            .unwrap();

        assert_eq!(generation.content, "ok");
        assert_eq!(provider.calls(), 3);
        // 500ms after the first failure, 1000ms after the second
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert_eq!(
            generation
                .attempts
                .iter()
                .map(|a| a.outcome)
                .collect::<Vec<_>>(),
            vec![
                AttemptKind::RetryableFailure,
                AttemptKind::RetryableFailure,
                AttemptKind::Success
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_attempted_once() {
        let provider = Arc::new(ScriptedProvider::new(vec![status(401)], Ok("never".to_string())));

        let err = gateway(provider.clone())
            .execute_with_attempts(ResourceType::TextGeneration, &request(), 5)
            .await
            .unwrap_err();

        assert_eq!(provider.calls(), 1);
        assert_eq!(err.reason, FailureReason::Unauthorized { status: 401 });
        assert!(!err.transient);
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_not_retried() {
        let provider = Arc::new(ScriptedProvider::always_err(ProviderError::Status {
            status: 400,
            body: "bad".to_string(),
        }));

        let err = gateway(provider.clone())
            .execute(ResourceType::TextGeneration, &request())
            .await
            .unwrap_err();

        assert_eq!(provider.calls(), 1);
        assert_eq!(err.reason, FailureReason::ClientError { status: 400 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_transient_error() {
        let provider = Arc::new(ScriptedProvider::always_err(ProviderError::Transport(
            "connection reset".to_string(),
        )));

        let err = gateway(provider.clone())
            .execute(ResourceType::TextGeneration, &request())
            .await
            .unwrap_err();

        assert_eq!(provider.calls(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(err.reason, FailureReason::Transport);
        assert!(err.transient);
        assert!(!err.to_string().contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_exhaustion() {
        let provider = Arc::new(ScriptedProvider::always_err(ProviderError::Status {
            status: 500,
            body: String::new(),
        }));
        let gateway = gateway(provider.clone()).with_fallbacks(
            FallbackCatalog::new().with(ResourceType::TextGeneration, "Here is a classic instead."),
        );

        let generation = gateway
            .execute(ResourceType::TextGeneration, &request())
            .await
            .unwrap();

        assert!(generation.degraded);
        assert!(!generation.content.is_empty());
        assert_eq!(generation.attempts.len(), 2);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_is_per_resource() {
        let provider = Arc::new(ScriptedProvider::always_err(ProviderError::Status {
            status: 500,
            body: String::new(),
        }));
        let gateway = gateway(provider).with_fallbacks(
            FallbackCatalog::new().with(ResourceType::TextGeneration, "fallback"),
        );

        assert!(gateway
            .execute(ResourceType::VoiceGeneration, &request())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_terminal() {
        let provider = Arc::new(ScriptedProvider::always_ok(""));

        let err = gateway(provider.clone())
            .execute(ResourceType::TextGeneration, &request())
            .await
            .unwrap_err();

        assert_eq!(provider.calls(), 1);
        assert_eq!(err.reason, FailureReason::MalformedPayload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let provider =
            Arc::new(ScriptedProvider::always_ok("slow").with_delay(Duration::from_secs(5)));
        let gateway = gateway(provider.clone()).with_config(GatewayConfig {
            timeout: Duration::from_secs(1),
            ..GatewayConfig::default()
        });

        let err = gateway
            .execute(ResourceType::TextGeneration, &request())
            .await
            .unwrap_err();

        assert_eq!(err.reason, FailureReason::Timeout);
        assert_eq!(err.attempts, 2);
        assert_eq!(provider.completed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let provider = Arc::new(ScriptedProvider::always_ok("x"));
        gateway(provider.clone())
            .execute_with_attempts(ResourceType::TextGeneration, &request(), 0)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_lets_attempt_finish() {
        let provider =
            Arc::new(ScriptedProvider::always_ok("late").with_delay(Duration::from_secs(2)));
        let gateway = Arc::new(gateway(provider.clone()));

        let caller = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                gateway
                    .execute(ResourceType::TextGeneration, &GenerationRequest::new("p"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        assert_eq!(provider.completed(), 0);

        // The provider call keeps running on its own task
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(provider.calls(), 1);
        assert_eq!(provider.completed(), 1);
    }
}
