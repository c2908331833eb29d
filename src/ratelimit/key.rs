//! Ledger key generation.

use std::fmt;

use crate::identity::{CallerIdentity, ResourceType};

/// A key that uniquely identifies a counter in the ledger.
///
/// Rate windows are keyed by `(resource, identity)`; usage period counters
/// additionally carry the period they belong to, so a new period starts on
/// a fresh key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    /// Which family of counters this key belongs to
    pub namespace: &'static str,
    /// The resource type being counted
    pub resource: ResourceType,
    /// Rendered caller identity
    pub identity: String,
    /// Usage period identifier, for period counters
    pub period: Option<String>,
}

impl LedgerKey {
    /// Key for the fixed rate window of a caller.
    pub fn rate_window(identity: &CallerIdentity, resource: ResourceType) -> Self {
        Self {
            namespace: "rl",
            resource,
            identity: identity.to_string(),
            period: None,
        }
    }

    /// Key for a caller's usage counter in a given period.
    pub fn usage_period(identity: &CallerIdentity, resource: ResourceType, period: &str) -> Self {
        Self {
            namespace: "usage",
            resource,
            identity: identity.to_string(),
            period: Some(period.to_string()),
        }
    }

    /// Convert the key to its ledger string representation.
    pub fn to_string_key(&self) -> String {
        match &self.period {
            Some(period) => format!(
                "{}:{}:{}:{}",
                self.namespace, self.resource, self.identity, period
            ),
            None => format!("{}:{}:{}", self.namespace, self.resource, self.identity),
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
