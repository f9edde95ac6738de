//! Tag reconciliation service.

use async_trait::async_trait;
use tracing::debug;

use crate::core::Transaction;
use crate::error::{BackendError, StorageError, StorageResult};

use super::definition::TagDefinition;
use super::reconcile::{ReconcilePolicy, TagPlan, reconcile};

/// The tag reconciliation collaborator of the engine.
#[async_trait]
pub trait TagReconciliation: Send + Sync {
    /// Computes the tag set to persist.
    fn reconcile(
        &self,
        previous: &[TagDefinition],
        incoming: &[TagDefinition],
        policy: &ReconcilePolicy,
    ) -> StorageResult<TagPlan>;

    /// Resolves each tag to its persisted definition, creating missing ones.
    ///
    /// The returned definitions carry their database ids, in input order.
    async fn resolve_definitions(
        &self,
        tx: &mut dyn Transaction,
        tags: &[TagDefinition],
    ) -> StorageResult<Vec<TagDefinition>>;
}

/// Default [`TagReconciliation`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagReconciler;

impl TagReconciler {
    /// Creates the reconciler.
    pub fn new() -> Self {
        Self
    }

    async fn resolve_one(
        &self,
        tx: &mut dyn Transaction,
        tag: &TagDefinition,
    ) -> StorageResult<TagDefinition> {
        let key = tag.key();
        if let Some(existing) = tx.find_tag_definition(&key).await? {
            return Ok(existing);
        }

        match tx.insert_tag_definition(tag).await {
            Ok(id) => {
                debug!(tag_type = %tag.tag_type, system = ?tag.system, code = ?tag.code, id, "Created tag definition");
                Ok(TagDefinition {
                    id: Some(id),
                    ..tag.clone()
                })
            }
            Err(e) if e.is_unique_violation() => {
                // Created concurrently; read it back once
                debug!(tag_type = %tag.tag_type, code = ?tag.code, "Tag definition created concurrently, re-reading");
                tx.find_tag_definition(&key).await?.ok_or_else(|| {
                    StorageError::Backend(BackendError::Internal {
                        backend_name: "tags".to_string(),
                        message: format!(
                            "Tag definition {:?}|{:?} vanished after a unique violation",
                            tag.system, tag.code
                        ),
                        source: None,
                    })
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl TagReconciliation for TagReconciler {
    fn reconcile(
        &self,
        previous: &[TagDefinition],
        incoming: &[TagDefinition],
        policy: &ReconcilePolicy,
    ) -> StorageResult<TagPlan> {
        reconcile(previous, incoming, policy)
    }

    async fn resolve_definitions(
        &self,
        tx: &mut dyn Transaction,
        tags: &[TagDefinition],
    ) -> StorageResult<Vec<TagDefinition>> {
        let mut resolved = Vec::with_capacity(tags.len());
        for tag in tags {
            if tag.id.is_some() {
                resolved.push(tag.clone());
                continue;
            }
            resolved.push(self.resolve_one(tx, tag).await?);
        }
        Ok(resolved)
    }
}
