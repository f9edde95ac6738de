//! Write interceptors.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageResult;
use crate::partition::RequestContext;
use crate::types::WriteOutcome;

/// Hooks invoked around writes.
///
/// Every hook defaults to a no-op. Returning an error from a pre-commit hook
/// vetoes the write and rolls back its transaction; the error reaches the
/// caller unchanged. No hook except the pre-storage ones runs for writes that
/// turn out to be no-ops.
#[async_trait]
pub trait WriteInterceptor: Send + Sync {
    /// Called before a resource with a client-assigned id is created.
    async fn pre_storage_client_assigned_id(
        &self,
        _ctx: &RequestContext,
        _resource_type: &str,
        _id: &str,
        _resource: &Value,
    ) -> StorageResult<()> {
        Ok(())
    }

    /// Called before any new resource is stored.
    async fn pre_storage_created(
        &self,
        _ctx: &RequestContext,
        _resource_type: &str,
        _resource: &Value,
    ) -> StorageResult<()> {
        Ok(())
    }

    /// Called before an update that produces a new version is committed.
    async fn pre_commit_updated(
        &self,
        _ctx: &RequestContext,
        _resource_type: &str,
        _previous: Option<&Value>,
        _resource: &Value,
    ) -> StorageResult<()> {
        Ok(())
    }

    /// Called before a delete is committed.
    async fn pre_commit_deleted(
        &self,
        _ctx: &RequestContext,
        _resource_type: &str,
        _id: &str,
        _previous: Option<&Value>,
    ) -> StorageResult<()> {
        Ok(())
    }

    /// Called after a write that persisted something has committed.
    async fn post_commit(&self, _ctx: &RequestContext, _outcome: &WriteOutcome) -> StorageResult<()> {
        Ok(())
    }
}
