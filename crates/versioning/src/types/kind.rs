//! Resource kind descriptors.
//!
//! The engine is generic over resource types. Per-type behaviour that the engine
//! needs (a default profile, reference target constraints, whether the type is
//! part of the standard model) is looked up in a [`ResourceKindRegistry`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Allowed target types for references found at one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRule {
    /// Top-level element holding a reference (or an array of references).
    pub element: String,
    /// Resource types the reference may point to.
    pub target_types: Vec<String>,
}

/// Descriptor of one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceKind {
    name: String,
    default_profile: Option<String>,
    reference_rules: Vec<ReferenceRule>,
    standard: bool,
}

impl ResourceKind {
    /// Creates a standard resource kind with no constraints.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_profile: None,
            reference_rules: Vec::new(),
            standard: true,
        }
    }

    /// Creates a custom (non-standard) kind identified by a profile.
    pub fn custom(name: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_profile: Some(profile.into()),
            reference_rules: Vec::new(),
            standard: false,
        }
    }

    /// Adds a reference target constraint.
    pub fn with_reference_rule<I, S>(mut self, element: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reference_rules.push(ReferenceRule {
            element: element.into(),
            target_types: targets.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default profile, if any.
    pub fn default_profile(&self) -> Option<&str> {
        self.default_profile.as_deref()
    }

    /// Reference target constraints.
    pub fn reference_rules(&self) -> &[ReferenceRule] {
        &self.reference_rules
    }

    /// Returns `true` for types of the standard model.
    pub fn is_standard(&self) -> bool {
        self.standard
    }
}

/// Lookup table of resource kinds.
#[derive(Debug, Clone, Default)]
pub struct ResourceKindRegistry {
    kinds: HashMap<String, ResourceKind>,
}

impl ResourceKindRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kind, replacing any previous kind with the same name.
    pub fn register(&mut self, kind: ResourceKind) {
        self.kinds.insert(kind.name.clone(), kind);
    }

    /// Registers a kind, builder style.
    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.register(kind);
        self
    }

    /// Returns the registered kind.
    pub fn get(&self, name: &str) -> Option<&ResourceKind> {
        self.kinds.get(name)
    }

    /// Returns the registered kind, or an unconstrained standard kind.
    pub fn get_or_default(&self, name: &str) -> ResourceKind {
        self.get(name)
            .cloned()
            .unwrap_or_else(|| ResourceKind::new(name))
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = ResourceKindRegistry::new()
            .with_kind(ResourceKind::new("Widget").with_reference_rule("owner", ["Person"]))
            .with_kind(ResourceKind::custom("Gadget", "http://example.org/gadget"));

        assert_eq!(registry.len(), 2);
        let widget = registry.get("Widget").unwrap();
        assert!(widget.is_standard());
        assert_eq!(widget.reference_rules()[0].target_types, vec!["Person"]);

        let gadget = registry.get("Gadget").unwrap();
        assert!(!gadget.is_standard());
        assert_eq!(gadget.default_profile(), Some("http://example.org/gadget"));
    }

    #[test]
    fn test_unknown_kind_defaults() {
        let registry = ResourceKindRegistry::new();
        assert!(registry.is_empty());
        let kind = registry.get_or_default("Thing");
        assert_eq!(kind.name(), "Thing");
        assert!(kind.is_standard());
        assert!(kind.reference_rules().is_empty());
    }
}
