//! Transaction traits.
//!
//! A [`Transaction`] is the single unit of work a write runs in. Identity
//! assignment, tag definition creation, tag links, history entries and the
//! current record are all written through the same transaction, so either all
//! of them become visible on [`Transaction::commit`] or none do.
//!
//! The trait is deliberately row-level: it knows nothing about versioning,
//! reconciliation or policies. Those live in the engine components, which makes
//! the trait easy to implement for another backend.
//!
//! # Example
//!
//! ```ignore
//! use helios_versioning::core::{Transaction, TransactionProvider};
//!
//! async fn bump<P: TransactionProvider>(
//!     provider: &P,
//!     ctx: &RequestContext,
//!     surrogate_id: i64,
//! ) -> StorageResult<()> {
//!     let mut tx = provider.begin(ctx).await?;
//!
//!     let mut record = tx.read_record(surrogate_id).await?
//!         .ok_or_else(|| StorageError::not_found("Widget", surrogate_id.to_string()))?;
//!     let expected = record.version;
//!     record.version += 1;
//!
//!     if !tx.update_record(&record, expected).await? {
//!         // someone else won the race
//!         tx.rollback().await?;
//!         return Ok(());
//!     }
//!
//!     tx.commit().await
//! }
//! ```

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::identity::StagedIdentity;
use crate::partition::{PartitionFilter, RequestContext};
use crate::tags::{TagDefinition, TagKey};
use crate::types::{HistoryEntry, ResourceLookup, ResourceRecord};

/// An active database transaction.
///
/// Dropping a transaction without committing it rolls it back.
#[async_trait]
pub trait Transaction: Send + Sync {
    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Allocates a new surrogate id, recording the external id if given.
    ///
    /// A duplicate `(partition, type, external id)` fails with
    /// [`BackendError::UniqueViolation`](crate::error::BackendError::UniqueViolation).
    async fn insert_identity(
        &mut self,
        partition_id: Option<i32>,
        resource_type: &str,
        external_id: Option<&str>,
    ) -> StorageResult<i64>;

    /// Records an explicit external id for an existing identity.
    async fn assign_external_id(&mut self, surrogate_id: i64, external_id: &str)
    -> StorageResult<()>;

    /// Finds identities with one of the given explicit external ids.
    async fn find_identities(
        &mut self,
        filter: &PartitionFilter,
        resource_type: &str,
        external_ids: &[String],
    ) -> StorageResult<Vec<ResourceLookup>>;

    /// Finds identities by surrogate id, regardless of partition.
    async fn find_identities_by_surrogate(
        &mut self,
        surrogate_ids: &[i64],
    ) -> StorageResult<Vec<ResourceLookup>>;

    /// Holds an identity cache entry until the transaction commits.
    fn stage_identity(&mut self, entry: StagedIdentity);

    /// Takes the staged identity cache entries, leaving none behind.
    fn take_staged_identities(&mut self) -> Vec<StagedIdentity>;

    // ------------------------------------------------------------------
    // Current records
    // ------------------------------------------------------------------

    /// Reads the current record.
    async fn read_record(&mut self, surrogate_id: i64) -> StorageResult<Option<ResourceRecord>>;

    /// Inserts the current record of a new resource.
    async fn insert_record(&mut self, record: &ResourceRecord) -> StorageResult<()>;

    /// Overwrites the current record if its stored version still equals
    /// `expected_version`. Returns `false` when no row matched.
    async fn update_record(
        &mut self,
        record: &ResourceRecord,
        expected_version: i64,
    ) -> StorageResult<bool>;

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Reads the history entry of one version.
    async fn read_history(
        &mut self,
        surrogate_id: i64,
        version: i64,
    ) -> StorageResult<Option<HistoryEntry>>;

    /// Lists every history entry of a resource, newest first.
    async fn list_history(&mut self, surrogate_id: i64) -> StorageResult<Vec<HistoryEntry>>;

    /// Inserts a history entry and returns its row id.
    async fn insert_history(&mut self, entry: &HistoryEntry) -> StorageResult<i64>;

    /// Overwrites the history entry with row id `entry.id`, including its version.
    async fn update_history(&mut self, entry: &HistoryEntry) -> StorageResult<()>;

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    /// Looks up a tag definition by identity.
    async fn find_tag_definition(&mut self, key: &TagKey) -> StorageResult<Option<TagDefinition>>;

    /// Inserts a tag definition and returns its id.
    async fn insert_tag_definition(&mut self, tag: &TagDefinition) -> StorageResult<i64>;

    /// Tags linked to the current record.
    async fn resource_tags(&mut self, surrogate_id: i64) -> StorageResult<Vec<TagDefinition>>;

    /// Replaces the tags linked to the current record.
    async fn replace_resource_tags(&mut self, surrogate_id: i64, tag_ids: &[i64])
    -> StorageResult<()>;

    /// Tags linked to a history entry.
    async fn history_tags(&mut self, history_id: i64) -> StorageResult<Vec<TagDefinition>>;

    /// Replaces the tags linked to a history entry.
    async fn replace_history_tags(
        &mut self,
        history_id: i64,
        surrogate_id: i64,
        tag_ids: &[i64],
    ) -> StorageResult<()>;

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Rolls back the transaction.
    async fn rollback(self: Box<Self>) -> StorageResult<()>;

    /// Returns the request context the transaction was started for.
    fn context(&self) -> &RequestContext;

    /// Returns whether the transaction is still active.
    fn is_active(&self) -> bool;
}

/// Source of transactions.
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    /// Starts a new transaction.
    async fn begin(&self, ctx: &RequestContext) -> StorageResult<Box<dyn Transaction>>;
}
