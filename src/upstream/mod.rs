//! Upstream text-generation gateway.
//!
//! Wraps a [`GenerationProvider`] with a per-attempt timeout, failure
//! classification, linear backoff retries and per-resource fallback content.

mod fallback;
mod gateway;
mod http;
pub mod mocks;
mod outcome;
mod provider;

pub use fallback::FallbackCatalog;
pub use gateway::{
    Generation, GatewayConfig, GatewayError, UpstreamGateway, DEFAULT_BASE_DELAY,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT,
};
pub use http::HttpProvider;
pub use outcome::{AttemptKind, AttemptOutcome, FailureReason, UpstreamAttempt};
pub use provider::{GenerationProvider, GenerationRequest, ProviderError};
