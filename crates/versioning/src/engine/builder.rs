//! Builder for [`ResourceEngine`].

use std::sync::Arc;

use crate::config::StorageSettings;
use crate::core::{ConditionalMatcher, ContentValidator, TransactionProvider, WriteInterceptor};
use crate::error::{StorageError, StorageResult};
use crate::history::VersionManager;
use crate::identity::{IdentityResolution, IdentityResolver};
use crate::tags::{TagReconciler, TagReconciliation};
use crate::types::{ResourceKind, ResourceKindRegistry};

use super::ResourceEngine;

/// Assembles a [`ResourceEngine`] from its collaborators.
///
/// Only the transaction provider is required. The identity resolver and tag
/// reconciler default to [`IdentityResolver`] and [`TagReconciler`] built on
/// the final settings.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use helios_versioning::backends::sqlite::SqliteBackend;
/// use helios_versioning::config::{StorageSettings, TagStorageMode};
/// use helios_versioning::engine::ResourceEngine;
///
/// let backend = SqliteBackend::in_memory().unwrap();
/// backend.init_schema().unwrap();
///
/// let engine = ResourceEngine::builder()
///     .with_provider(Arc::new(backend))
///     .with_settings(StorageSettings::default().with_tag_storage_mode(TagStorageMode::Inline))
///     .build()
///     .unwrap();
/// assert_eq!(engine.settings().tag_storage_mode, TagStorageMode::Inline);
/// ```
#[derive(Default)]
pub struct ResourceEngineBuilder {
    provider: Option<Arc<dyn TransactionProvider>>,
    settings: Option<StorageSettings>,
    identities: Option<Arc<dyn IdentityResolution>>,
    tags: Option<Arc<dyn TagReconciliation>>,
    kinds: ResourceKindRegistry,
    validator: Option<Arc<dyn ContentValidator>>,
    matcher: Option<Arc<dyn ConditionalMatcher>>,
    interceptors: Vec<Arc<dyn WriteInterceptor>>,
}

impl ResourceEngineBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transaction provider.
    pub fn with_provider(mut self, provider: Arc<dyn TransactionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets the storage settings.
    pub fn with_settings(mut self, settings: StorageSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Replaces the identity resolver.
    pub fn with_identity_resolution(mut self, identities: Arc<dyn IdentityResolution>) -> Self {
        self.identities = Some(identities);
        self
    }

    /// Replaces the tag reconciler.
    pub fn with_tag_reconciliation(mut self, tags: Arc<dyn TagReconciliation>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Registers a resource kind.
    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kinds.register(kind);
        self
    }

    /// Sets the kind registry.
    pub fn with_kinds(mut self, kinds: ResourceKindRegistry) -> Self {
        self.kinds = kinds;
        self
    }

    /// Sets the content validator.
    pub fn with_validator(mut self, validator: Arc<dyn ContentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Sets the conditional create matcher.
    pub fn with_matcher(mut self, matcher: Arc<dyn ConditionalMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Adds a write interceptor. Interceptors run in registration order.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn WriteInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Builds the engine.
    pub fn build(self) -> StorageResult<ResourceEngine> {
        let provider = self.provider.ok_or_else(|| {
            StorageError::invalid_request("A transaction provider is required")
        })?;
        let settings = self.settings.unwrap_or_default();
        settings.validate()?;
        let settings = Arc::new(settings);

        let identities = self
            .identities
            .unwrap_or_else(|| Arc::new(IdentityResolver::new(settings.clone())));
        let tags = self.tags.unwrap_or_else(|| Arc::new(TagReconciler::new()));

        Ok(ResourceEngine {
            versions: VersionManager::new(settings.clone()),
            settings,
            provider,
            identities,
            tags,
            kinds: self.kinds,
            validator: self.validator,
            matcher: self.matcher,
            interceptors: self.interceptors,
        })
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::backends::sqlite::SqliteBackend;
    use crate::config::ClientIdStrategy;
    use crate::error::ErrorKind;

    #[test]
    fn test_build_requires_provider() {
        let err = ResourceEngineBuilder::new().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_build_with_defaults() {
        let backend = SqliteBackend::in_memory().unwrap();
        let engine = ResourceEngineBuilder::new()
            .with_provider(Arc::new(backend))
            .with_kind(ResourceKind::custom("Gizmo", "http://example.org/gizmo"))
            .build()
            .unwrap();
        assert_eq!(
            engine.settings().client_id_strategy,
            ClientIdStrategy::AlphanumericOnly
        );
        assert!(engine.settings().history_enabled);
    }
}
