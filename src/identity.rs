//! Caller identity, subscription tier and resource type.
//!
//! These are supplied per request by the identity-resolution layer in front
//! of the core. The core never caches a tier across requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Who is making the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CallerIdentity {
    /// An unauthenticated caller, keyed by a token derived from its network address
    Anonymous { address_token: String },
    /// An authenticated user
    User { user_id: String },
}

impl CallerIdentity {
    /// Create an anonymous identity from an already-derived address token.
    pub fn anonymous(token: impl Into<String>) -> Self {
        CallerIdentity::Anonymous {
            address_token: token.into(),
        }
    }

    /// Derive an anonymous identity from a network address.
    ///
    /// IPv6 addresses are collapsed to their /64 prefix so a single client
    /// cannot rotate through its own subnet to get fresh windows.
    pub fn anonymous_from_addr(addr: IpAddr) -> Self {
        let token = match addr {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => {
                let segments = v6.segments();
                format!(
                    "{:x}:{:x}:{:x}:{:x}::/64",
                    segments[0], segments[1], segments[2], segments[3]
                )
            }
        };
        Self::anonymous(token)
    }

    /// Create an authenticated identity.
    pub fn user(user_id: impl Into<String>) -> Self {
        CallerIdentity::User {
            user_id: user_id.into(),
        }
    }

    /// Whether this caller is unauthenticated.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, CallerIdentity::Anonymous { .. })
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerIdentity::Anonymous { address_token } => write!(f, "anon:{}", address_token),
            CallerIdentity::User { user_id } => write!(f, "user:{}", user_id),
        }
    }
}

/// Subscription tier of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Anonymous,
    Free,
    Pro,
    Enterprise,
}

impl SubscriptionTier {
    /// All tiers, cheapest first.
    pub const ALL: [SubscriptionTier; 4] = [
        SubscriptionTier::Anonymous,
        SubscriptionTier::Free,
        SubscriptionTier::Pro,
        SubscriptionTier::Enterprise,
    ];

    /// The label used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Anonymous => "anonymous",
            SubscriptionTier::Free => "free",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anonymous" | "anon" => Ok(SubscriptionTier::Anonymous),
            "free" => Ok(SubscriptionTier::Free),
            "pro" => Ok(SubscriptionTier::Pro),
            "enterprise" => Ok(SubscriptionTier::Enterprise),
            other => Err(format!("unknown subscription tier: {}", other)),
        }
    }
}

/// The kind of resource a request consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    GenericApi,
    TextGeneration,
    VoiceGeneration,
    ChatMessage,
    AuthenticationAttempt,
    PaymentAttempt,
    AdminOperation,
}

impl ResourceType {
    /// All resource types.
    pub const ALL: [ResourceType; 7] = [
        ResourceType::GenericApi,
        ResourceType::TextGeneration,
        ResourceType::VoiceGeneration,
        ResourceType::ChatMessage,
        ResourceType::AuthenticationAttempt,
        ResourceType::PaymentAttempt,
        ResourceType::AdminOperation,
    ];

    /// The label used in configuration, ledger keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::GenericApi => "generic-api",
            ResourceType::TextGeneration => "text-generation",
            ResourceType::VoiceGeneration => "voice-generation",
            ResourceType::ChatMessage => "chat-message",
            ResourceType::AuthenticationAttempt => "authentication-attempt",
            ResourceType::PaymentAttempt => "payment-attempt",
            ResourceType::AdminOperation => "admin-operation",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('_', "-");
        ResourceType::ALL
            .into_iter()
            .find(|r| r.as_str() == needle)
            .ok_or_else(|| format!("unknown resource type: {}", s))
    }
}
