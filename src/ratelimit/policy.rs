//! Quota policy table.
//!
//! One row per `(resource type, subscription tier)` pair holding the short
//! abuse-prevention window and the longer business-period allowance. Tier
//! changes are a data edit: the built-in table can be overridden row by row
//! from YAML.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Result, TurnstileError};
use crate::identity::{ResourceType, SubscriptionTier};

/// Window used for pairs with no configured row.
const DEFAULT_WINDOW_SECS: u64 = 60;
/// Window maximum used for pairs with no configured row.
const DEFAULT_MAX_IN_WINDOW: u64 = 60;

/// Limits applied to one `(resource, tier)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    /// Length of the fixed rate window in seconds
    pub window_secs: u64,
    /// Requests admitted per window
    pub max_in_window: u64,
    /// Requests allowed per usage period; `None` means unlimited.
    ///
    /// For the anonymous tier this is the per-window anonymous allowance.
    #[serde(default)]
    pub period_limit: Option<u64>,
}

impl QuotaPolicy {
    /// A policy with no period allowance.
    pub const fn windowed(window_secs: u64, max_in_window: u64) -> Self {
        Self {
            window_secs,
            max_in_window,
            period_limit: None,
        }
    }

    /// A policy with a period allowance.
    pub const fn metered(window_secs: u64, max_in_window: u64, period_limit: u64) -> Self {
        Self {
            window_secs,
            max_in_window,
            period_limit: Some(period_limit),
        }
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::windowed(DEFAULT_WINDOW_SECS, DEFAULT_MAX_IN_WINDOW)
    }
}

/// A single row as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRow {
    /// The resource type this row applies to
    pub resource: ResourceType,
    /// The subscription tier this row applies to
    pub tier: SubscriptionTier,
    #[serde(flatten)]
    pub policy: QuotaPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    policies: Vec<PolicyRow>,
}

/// Lookup table from `(resource, tier)` to [`QuotaPolicy`].
#[derive(Debug, Clone, Default)]
pub struct QuotaPolicyTable {
    rows: BTreeMap<(ResourceType, SubscriptionTier), QuotaPolicy>,
}

impl QuotaPolicyTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in policy table.
    pub fn defaults() -> Self {
        use ResourceType::*;
        use SubscriptionTier::*;

        let mut table = Self::new();
        let rows = [
            (GenericApi, Anonymous, QuotaPolicy::windowed(60, 30)),
            (GenericApi, Free, QuotaPolicy::windowed(60, 60)),
            (GenericApi, Pro, QuotaPolicy::windowed(60, 300)),
            (GenericApi, Enterprise, QuotaPolicy::windowed(60, 1000)),
            (TextGeneration, Anonymous, QuotaPolicy::metered(60, 10, 5)),
            (TextGeneration, Free, QuotaPolicy::metered(60, 10, 50)),
            (TextGeneration, Pro, QuotaPolicy::metered(60, 30, 1000)),
            (TextGeneration, Enterprise, QuotaPolicy::windowed(60, 120)),
            (VoiceGeneration, Anonymous, QuotaPolicy::metered(60, 5, 1)),
            (VoiceGeneration, Free, QuotaPolicy::metered(60, 5, 10)),
            (VoiceGeneration, Pro, QuotaPolicy::metered(60, 20, 200)),
            (VoiceGeneration, Enterprise, QuotaPolicy::windowed(60, 60)),
            (ChatMessage, Anonymous, QuotaPolicy::metered(60, 20, 10)),
            (ChatMessage, Free, QuotaPolicy::metered(60, 30, 200)),
            (ChatMessage, Pro, QuotaPolicy::metered(60, 120, 5000)),
            (ChatMessage, Enterprise, QuotaPolicy::windowed(60, 600)),
            (AuthenticationAttempt, Anonymous, QuotaPolicy::windowed(900, 5)),
            (AuthenticationAttempt, Free, QuotaPolicy::windowed(900, 5)),
            (AuthenticationAttempt, Pro, QuotaPolicy::windowed(900, 5)),
            (AuthenticationAttempt, Enterprise, QuotaPolicy::windowed(900, 10)),
            (PaymentAttempt, Anonymous, QuotaPolicy::windowed(3600, 3)),
            (PaymentAttempt, Free, QuotaPolicy::windowed(3600, 10)),
            (PaymentAttempt, Pro, QuotaPolicy::windowed(3600, 10)),
            (PaymentAttempt, Enterprise, QuotaPolicy::windowed(3600, 20)),
            (AdminOperation, Anonymous, QuotaPolicy::windowed(60, 0)),
            (AdminOperation, Free, QuotaPolicy::windowed(60, 30)),
            (AdminOperation, Pro, QuotaPolicy::windowed(60, 30)),
            (AdminOperation, Enterprise, QuotaPolicy::windowed(60, 100)),
        ];
        for (resource, tier, policy) in rows {
            table.insert(resource, tier, policy);
        }
        table
    }

    /// Load rows from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading quota policy table");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rows from a YAML string.
    ///
    /// Accepts either a `policies:` mapping or a bare list of rows. An
    /// empty document is an empty table.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let parse_error = |e: serde_yaml::Error| {
            TurnstileError::Config(format!("Failed to parse quota policy table: {}", e))
        };

        let document: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(parse_error)?;
        let rows = match document {
            serde_yaml::Value::Null => Vec::new(),
            serde_yaml::Value::Sequence(_) => {
                serde_yaml::from_value::<Vec<PolicyRow>>(document).map_err(parse_error)?
            }
            document => serde_yaml::from_value::<PolicyFile>(document)
                .map_err(parse_error)?
                .policies,
        };

        let mut table = Self::new();
        for row in rows {
            if row.policy.window_secs == 0 {
                return Err(TurnstileError::Config(format!(
                    "window_secs must be positive for {}/{}",
                    row.resource, row.tier
                )));
            }
            table.insert(row.resource, row.tier, row.policy);
        }
        Ok(table)
    }

    /// Insert or replace a row.
    pub fn insert(&mut self, resource: ResourceType, tier: SubscriptionTier, policy: QuotaPolicy) {
        self.rows.insert((resource, tier), policy);
    }

    /// Overlay `other` on top of this table, replacing matching rows.
    pub fn merged(mut self, other: QuotaPolicyTable) -> Self {
        for (key, policy) in other.rows {
            debug!(resource = %key.0, tier = %key.1, ?policy, "Overriding quota policy row");
            self.rows.insert(key, policy);
        }
        self
    }

    /// Get the configured row for a pair, if any.
    pub fn get(&self, resource: ResourceType, tier: SubscriptionTier) -> Option<&QuotaPolicy> {
        self.rows.get(&(resource, tier))
    }

    /// Get the policy for a pair, falling back to the default policy.
    pub fn lookup(&self, resource: ResourceType, tier: SubscriptionTier) -> QuotaPolicy {
        self.get(resource, tier).copied().unwrap_or_default()
    }

    /// All rows in `(resource, tier)` order.
    pub fn rows(&self) -> Vec<PolicyRow> {
        self.rows
            .iter()
            .map(|(&(resource, tier), &policy)| PolicyRow {
                resource,
                tier,
                policy,
            })
            .collect()
    }

    /// Number of configured rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_pair() {
        let table = QuotaPolicyTable::defaults();
        for resource in ResourceType::ALL {
            for tier in SubscriptionTier::ALL {
                assert!(
                    table.get(resource, tier).is_some(),
                    "missing row for {}/{}",
                    resource,
                    tier
                );
            }
        }
    }

    #[test]
    fn test_default_period_limits() {
        let table = QuotaPolicyTable::defaults();
        let text = |tier| table.lookup(ResourceType::TextGeneration, tier).period_limit;

        assert_eq!(text(SubscriptionTier::Free), Some(50));
        assert_eq!(text(SubscriptionTier::Pro), Some(1000));
        assert_eq!(text(SubscriptionTier::Enterprise), None);
    }

    #[test]
    fn test_parse_policy_file() {
        let yaml = r#"
policies:
  - resource: text-generation
    tier: free
    window_secs: 60
    max_in_window: 10
    period_limit: 50
  - resource: authentication-attempt
    tier: anonymous
    window_secs: 900
    max_in_window: 5
"#;
        let table = QuotaPolicyTable::from_yaml(yaml).unwrap();
        assert_eq!(table.len(), 2);

        let auth = table.lookup(ResourceType::AuthenticationAttempt, SubscriptionTier::Anonymous);
        assert_eq!(auth, QuotaPolicy::windowed(900, 5));
    }

    #[test]
    fn test_parse_bare_row_list() {
        let yaml = r#"
- resource: chat-message
  tier: pro
  window_secs: 30
  max_in_window: 100
  period_limit: 9000
"#;
        let table = QuotaPolicyTable::from_yaml(yaml).unwrap();
        assert_eq!(
            table.lookup(ResourceType::ChatMessage, SubscriptionTier::Pro),
            QuotaPolicy::metered(30, 100, 9000)
        );
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = r#"
- resource: generic-api
  tier: free
  window_secs: 0
  max_in_window: 1
"#;
        assert!(matches!(
            QuotaPolicyTable::from_yaml(yaml),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_misspelled_top_level_key_rejected() {
        let yaml = r#"
polices:
  - resource: text-generation
    tier: free
    window_secs: 60
    max_in_window: 10
"#;
        let err = QuotaPolicyTable::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("polices"), "{}", err);

        assert!(QuotaPolicyTable::from_yaml("{}").is_err());
        assert!(QuotaPolicyTable::from_yaml("").unwrap().is_empty());
    }

    #[test]
    fn test_bad_row_in_list_reports_its_own_error() {
        let yaml = r#"
- resource: generic-api
  tier: free
  window_secs: sixty
  max_in_window: 1
"#;
        let err = QuotaPolicyTable::from_yaml(yaml).unwrap_err();
        assert!(!err.to_string().contains("policies"), "{}", err);
    }

    #[test]
    fn test_unknown_tier_rejected() {
        let yaml = r#"
- resource: generic-api
  tier: platinum
  window_secs: 60
  max_in_window: 1
"#;
        assert!(QuotaPolicyTable::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_merged_overrides_single_row() {
        let mut overrides = QuotaPolicyTable::new();
        overrides.insert(
            ResourceType::TextGeneration,
            SubscriptionTier::Free,
            QuotaPolicy::metered(60, 5, 20),
        );

        let table = QuotaPolicyTable::defaults().merged(overrides);
        assert_eq!(
            table.lookup(ResourceType::TextGeneration, SubscriptionTier::Free),
            QuotaPolicy::metered(60, 5, 20)
        );
        assert_eq!(
            table.lookup(ResourceType::TextGeneration, SubscriptionTier::Pro),
            QuotaPolicy::metered(60, 30, 1000)
        );
        assert_eq!(table.len(), QuotaPolicyTable::defaults().len());
    }

    #[test]
    fn test_lookup_falls_back_to_default() {
        let table = QuotaPolicyTable::new();
        assert_eq!(
            table.lookup(ResourceType::GenericApi, SubscriptionTier::Free),
            QuotaPolicy::default()
        );
    }
}
