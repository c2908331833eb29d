//! Upstream provider trait and its error type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A structured prompt handed to the text-generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The user-facing prompt
    pub prompt: String,
    /// Optional system instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Optional cap on generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// A request with only a prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            max_tokens: None,
        }
    }

    /// Attach a system instruction.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Cap generated tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Raw failure of a single provider call, before classification.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The request never got an HTTP response
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider did not answer in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered with a non-success status
    #[error("provider returned HTTP {status}")]
    Status { status: u16, body: String },

    /// A success status with a body we could not use
    #[error("malformed provider payload: {0}")]
    MalformedPayload(String),
}

/// Trait for text-generation providers.
///
/// Implementations perform exactly one call per invocation; retries,
/// timeouts and fallbacks belong to the gateway.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate text for a request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError>;
}
