//! Configuration management for Turnstile.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, TurnstileError};
use crate::identity::ResourceType;
use crate::ledger::{LedgerStore, MemoryLedger};
use crate::ratelimit::{QuotaPolicyTable, SuccessfulAttempts};
use crate::upstream::{FallbackCatalog, GatewayConfig, HttpProvider};

/// Prefix for environment overrides, e.g. `TURNSTILE__UPSTREAM__TIMEOUT_MS`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the admission core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Upstream provider configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Ledger backend configuration
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Authentication attempt accounting
    #[serde(default)]
    pub authentication: AuthenticationConfig,

    /// Optional YAML file of quota policy rows, merged over the defaults
    #[serde(default)]
    pub policies_path: Option<PathBuf>,

    /// Fallback content per resource type
    #[serde(default)]
    pub fallbacks: HashMap<ResourceType, String>,
}

/// Upstream provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Chat-completions endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer token for the provider
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier sent with each request
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per generation, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff step in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8000/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "default".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

impl UpstreamConfig {
    /// Retry and timeout settings for the gateway.
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }

    /// Build the HTTP provider this section describes.
    pub fn provider(&self) -> HttpProvider {
        let provider = HttpProvider::new(&self.endpoint, &self.model);
        match &self.api_key {
            Some(key) => provider.with_api_key(key),
            None => provider,
        }
    }
}

/// Which ledger implementation backs the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// Process-local counters
    #[default]
    Memory,
    /// Shared Redis counters (requires the `redis` feature)
    Redis,
}

/// Ledger backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: LedgerBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix applied to every Redis key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// How often the in-memory backend purges expired keys
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "turnstile:".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl LedgerConfig {
    /// Connect the configured ledger backend.
    pub async fn connect(&self) -> Result<Arc<dyn LedgerStore>> {
        match self.backend {
            LedgerBackend::Memory => {
                debug!(
                    sweep_interval_secs = self.sweep_interval_secs,
                    "Using in-memory ledger"
                );
                let ledger = Arc::new(MemoryLedger::new());
                ledger.spawn_sweeper(Duration::from_secs(self.sweep_interval_secs));
                Ok(ledger)
            }
            #[cfg(feature = "redis")]
            LedgerBackend::Redis => {
                use crate::ledger::{RedisLedger, RedisLedgerConfig};

                info!(url = %self.redis_url, "Connecting Redis ledger");
                let ledger = RedisLedger::connect_with_config(
                    &self.redis_url,
                    RedisLedgerConfig {
                        key_prefix: self.key_prefix.clone(),
                    },
                )
                .await?;
                Ok(Arc::new(ledger))
            }
            #[cfg(not(feature = "redis"))]
            LedgerBackend::Redis => Err(TurnstileError::Config(
                "ledger backend 'redis' requires the `redis` feature".to_string(),
            )),
        }
    }
}

/// Authentication attempt accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    /// Whether successful logins consume a window slot
    #[serde(default)]
    pub successful_attempts: SuccessfulAttempts,
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TurnstileConfig = serde_yaml::from_str(&contents)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file overlaid with
    /// `TURNSTILE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let config: TurnstileConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// The default policy table with the configured overrides merged in.
    pub fn policy_table(&self) -> Result<QuotaPolicyTable> {
        let defaults = QuotaPolicyTable::defaults();
        match &self.policies_path {
            Some(path) => Ok(defaults.merged(QuotaPolicyTable::from_file(path)?)),
            None => Ok(defaults),
        }
    }

    /// The configured fallback catalog.
    pub fn fallback_catalog(&self) -> FallbackCatalog {
        FallbackCatalog::from(self.fallbacks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
upstream:
  endpoint: https://llm.internal/v1/chat/completions
  api_key: sk-test
  model: storyteller
  timeout_ms: 5000
  max_attempts: 3
authentication:
  successful_attempts: count
fallbacks:
  text-generation: "The storyteller is resting. Here is an old favourite instead."
"#;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", uuid::Uuid::new_v4(), name));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.upstream.timeout_ms, 30_000);
        assert_eq!(config.upstream.max_attempts, 2);
        assert_eq!(config.upstream.base_delay_ms, 500);
        assert_eq!(config.ledger.backend, LedgerBackend::Memory);
        assert_eq!(
            config.authentication.successful_attempts,
            SuccessfulAttempts::Refund
        );
        assert!(config.fallback_catalog().is_empty());
    }

    #[test]
    fn test_from_file() {
        let path = write_temp("turnstile.yaml", SAMPLE);
        let config = TurnstileConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.upstream.model, "storyteller");
        assert_eq!(config.upstream.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.upstream.base_delay_ms, 500);
        assert_eq!(
            config.authentication.successful_attempts,
            SuccessfulAttempts::Count
        );

        let gateway = config.upstream.gateway_config();
        assert_eq!(gateway.timeout, Duration::from_secs(5));
        assert_eq!(gateway.max_attempts, 3);

        let catalog = config.fallback_catalog();
        assert!(catalog.get(ResourceType::TextGeneration).is_some());
    }

    #[test]
    fn test_load_layers_file() {
        let path = write_temp("turnstile.yaml", SAMPLE);
        let config = TurnstileConfig::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.upstream.max_attempts, 3);
        assert_eq!(config.upstream.endpoint, "https://llm.internal/v1/chat/completions");
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let path = write_temp("broken.yaml", "upstream: [not, a, map]");
        let err = TurnstileConfig::from_file(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_policy_overrides_merge_over_defaults() {
        let path = write_temp(
            "policies.yaml",
            r#"
- resource: text-generation
  tier: free
  window_secs: 60
  max_in_window: 2
  period_limit: 7
"#,
        );
        let config = TurnstileConfig {
            policies_path: Some(path.clone()),
            ..TurnstileConfig::default()
        };
        let table = config.policy_table().unwrap();
        std::fs::remove_file(&path).ok();

        let free = table.lookup(
            ResourceType::TextGeneration,
            crate::identity::SubscriptionTier::Free,
        );
        assert_eq!(free.max_in_window, 2);
        assert_eq!(free.period_limit, Some(7));
        assert!(table
            .get(ResourceType::ChatMessage, crate::identity::SubscriptionTier::Pro)
            .is_some());
    }

    #[tokio::test]
    async fn test_memory_backend_connects() {
        let config = LedgerConfig {
            sweep_interval_secs: 1,
            ..LedgerConfig::default()
        };
        let ledger = config.connect().await.unwrap();

        assert_eq!(ledger.increment_with_expiry("k", 60).await.unwrap(), 1);
        assert_eq!(LedgerConfig::default().sweep_interval_secs, 60);
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_backend_requires_feature() {
        let config = LedgerConfig {
            backend: LedgerBackend::Redis,
            ..LedgerConfig::default()
        };
        assert!(matches!(config.connect().await, Err(TurnstileError::Config(_))));
    }
}
