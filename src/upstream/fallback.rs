//! Precomputed fallback content per resource type.

use std::collections::HashMap;

use crate::identity::ResourceType;

/// Fallback responses served when the provider cannot produce content.
#[derive(Debug, Clone, Default)]
pub struct FallbackCatalog {
    entries: HashMap<ResourceType, String>,
}

impl FallbackCatalog {
    /// An empty catalog: every failure propagates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register fallback content for a resource type. Blank content is ignored.
    pub fn with(mut self, resource: ResourceType, content: impl Into<String>) -> Self {
        self.insert(resource, content);
        self
    }

    /// Register fallback content for a resource type. Blank content is ignored.
    pub fn insert(&mut self, resource: ResourceType, content: impl Into<String>) {
        let content = content.into();
        if !content.trim().is_empty() {
            self.entries.insert(resource, content);
        }
    }

    /// Fallback content for a resource type, if one is configured.
    pub fn get(&self, resource: ResourceType) -> Option<&str> {
        self.entries.get(&resource).map(String::as_str)
    }

    /// Number of resource types with a fallback.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no fallbacks are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<HashMap<ResourceType, String>> for FallbackCatalog {
    fn from(entries: HashMap<ResourceType, String>) -> Self {
        let mut catalog = Self::new();
        for (resource, content) in entries {
            catalog.insert(resource, content);
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let catalog = FallbackCatalog::new().with(ResourceType::TextGeneration, "Try again soon.");
        assert_eq!(catalog.get(ResourceType::TextGeneration), Some("Try again soon."));
        assert_eq!(catalog.get(ResourceType::VoiceGeneration), None);
    }

    #[test]
    fn test_blank_content_ignored() {
        let mut entries = HashMap::new();
        entries.insert(ResourceType::ChatMessage, "   ".to_string());
        let catalog = FallbackCatalog::from(entries);
        assert!(catalog.is_empty());
    }
}
