//! Scripted provider for tests and offline simulation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::provider::{GenerationProvider, GenerationRequest, ProviderError};

/// A provider that replays a fixed script of results.
///
/// Once the script runs out every call returns the `then` result.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    then: Result<String, ProviderError>,
    delay: Duration,
    calls: AtomicU32,
    completed: AtomicU32,
}

impl ScriptedProvider {
    /// Replay `script`, then keep returning `then`.
    pub fn new(
        script: Vec<Result<String, ProviderError>>,
        then: Result<String, ProviderError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            then,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            completed: AtomicU32::new(0),
        }
    }

    /// Always succeed with `content`.
    pub fn always_ok(content: impl Into<String>) -> Self {
        Self::new(Vec::new(), Ok(content.into()))
    }

    /// Always fail with `error`.
    pub fn always_err(error: ProviderError) -> Self {
        Self::new(Vec::new(), Err(error))
    }

    /// Sleep for `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls that ran to the end of their delay and answered.
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().pop_front();
        self.completed.fetch_add(1, Ordering::SeqCst);
        next.unwrap_or_else(|| self.then.clone())
    }
}
