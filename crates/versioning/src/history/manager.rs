//! Version and history management.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, trace};

use crate::codec::{self, EncodedResource, ResourceEncoding};
use crate::config::{StorageSettings, TagStorageMode};
use crate::core::Transaction;
use crate::error::{ConcurrencyError, ResourceError, StorageError, StorageResult};
use crate::tags::TagDefinition;
use crate::types::{HistoryEntry, IndexStatus, ResourceLookup, ResourceRecord, StoredResource};

use super::provenance::Provenance;
use super::render::render_resource;

/// Lifecycle state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// No current record exists.
    NonExistent,
    /// The resource is live at a version.
    Live(i64),
    /// The resource is tombstoned at a version.
    Deleted(i64),
}

impl ResourceState {
    /// Derives the state from an optional current record.
    pub fn of(record: Option<&ResourceRecord>) -> Self {
        match record {
            None => ResourceState::NonExistent,
            Some(r) if r.is_deleted() => ResourceState::Deleted(r.version),
            Some(r) => ResourceState::Live(r.version),
        }
    }

    /// The current version, if any.
    pub fn version(&self) -> Option<i64> {
        match self {
            ResourceState::NonExistent => None,
            ResourceState::Live(v) | ResourceState::Deleted(v) => Some(*v),
        }
    }
}

/// Flags of a write that steer change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFlags {
    /// Run change detection and mark the record indexed.
    pub perform_indexing: bool,
    /// Write a new version even without a change.
    pub force: bool,
}

/// The decision taken for a write against an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordChange {
    /// Version the record will carry.
    pub new_version: i64,
    /// Whether a new version is written.
    pub changed: bool,
    /// Whether the write brings a tombstoned resource back to life.
    pub resurrected: bool,
    /// Index status after the write.
    pub index_status: IndexStatus,
}

impl RecordChange {
    /// Decides whether a write produces a new version.
    ///
    /// Without indexing the decision is deferred: the record is marked pending
    /// and the version always increments. Otherwise a hash difference, a tag
    /// change, a force flag or a missing current history row each count as a
    /// change.
    pub fn detect(
        current: &ResourceRecord,
        encoded: &EncodedResource,
        tags_changed: bool,
        flags: ChangeFlags,
        history_present: bool,
    ) -> Self {
        let resurrected = current.is_deleted();
        let (changed, index_status) = if !flags.perform_indexing {
            (true, IndexStatus::Pending)
        } else {
            let content_changed =
                resurrected || current.content_hash != encoded.hash || !history_present;
            (
                content_changed || tags_changed || flags.force,
                IndexStatus::Indexed,
            )
        };

        Self {
            new_version: if changed {
                current.version + 1
            } else {
                current.version
            },
            changed,
            resurrected,
            index_status,
        }
    }

    /// The decision for deleting a live record.
    pub fn deletion(current: &ResourceRecord) -> Self {
        Self {
            new_version: current.version + 1,
            changed: true,
            resurrected: false,
            index_status: IndexStatus::Indexed,
        }
    }
}

/// Result of a history rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteResult {
    /// The version was overwritten.
    Rewritten,
    /// The stored content was identical and the write was suppressed.
    Unchanged,
}

/// Persists versions and renders them back.
#[derive(Debug, Clone)]
pub struct VersionManager {
    settings: Arc<StorageSettings>,
}

impl VersionManager {
    /// Creates a manager.
    pub fn new(settings: Arc<StorageSettings>) -> Self {
        Self { settings }
    }

    /// Returns the settings.
    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    /// The tag set currently persisted for a record.
    pub async fn current_tags(
        &self,
        tx: &mut dyn Transaction,
        record: &ResourceRecord,
    ) -> StorageResult<Vec<TagDefinition>> {
        if self.settings.tag_storage_mode.uses_links() {
            tx.resource_tags(record.surrogate_id).await
        } else {
            Ok(record.inline_tags.clone())
        }
    }

    /// Returns `true` if the history row of the current version exists.
    pub async fn has_current_history(
        &self,
        tx: &mut dyn Transaction,
        record: &ResourceRecord,
    ) -> StorageResult<bool> {
        Ok(tx
            .read_history(record.surrogate_id, record.version)
            .await?
            .is_some())
    }

    /// Writes version 1 of a new resource.
    pub async fn persist_create(
        &self,
        tx: &mut dyn Transaction,
        identity: &ResourceLookup,
        encoded: &EncodedResource,
        tags: &[TagDefinition],
        provenance: &Provenance,
        perform_indexing: bool,
    ) -> StorageResult<ResourceRecord> {
        let now = Utc::now();
        let record = ResourceRecord {
            surrogate_id: identity.surrogate_id,
            resource_type: identity.resource_type.clone(),
            partition_id: identity.partition_id,
            version: 1,
            content_hash: encoded.hash.clone(),
            encoding: encoded.encoding,
            index_status: if perform_indexing {
                IndexStatus::Indexed
            } else {
                IndexStatus::Pending
            },
            deleted_at: None,
            updated_at: now,
            published_at: now,
            has_tags: !tags.is_empty(),
            inline_tags: self.inline_snapshot(tags),
        };
        tx.insert_record(&record).await?;

        let entry = self.history_entry(&record, encoded, provenance);
        let history_id = tx.insert_history(&entry).await?;
        self.persist_tag_links(tx, record.surrogate_id, history_id, tags)
            .await?;

        debug!(
            resource_type = %record.resource_type,
            surrogate_id = record.surrogate_id,
            "Persisted version 1"
        );
        Ok(record)
    }

    /// Writes a new version of an existing resource.
    ///
    /// The current record is replaced only if it still carries `current.version`.
    /// A deletion is written by passing [`EncodedResource::deleted`].
    pub async fn persist_version(
        &self,
        tx: &mut dyn Transaction,
        current: &ResourceRecord,
        change: &RecordChange,
        encoded: &EncodedResource,
        tags: &[TagDefinition],
        provenance: &Provenance,
    ) -> StorageResult<ResourceRecord> {
        let now = Utc::now();
        let deleting = encoded.encoding == ResourceEncoding::Deleted;
        let record = ResourceRecord {
            version: change.new_version,
            content_hash: encoded.hash.clone(),
            encoding: encoded.encoding,
            index_status: change.index_status,
            deleted_at: if deleting { Some(now) } else { None },
            updated_at: now,
            has_tags: !tags.is_empty(),
            inline_tags: self.inline_snapshot(tags),
            ..current.clone()
        };

        if !tx.update_record(&record, current.version).await? {
            return Err(self.conflict(tx, current).await);
        }

        let mut entry = self.history_entry(&record, encoded, provenance);
        let reusable = if self.settings.history_enabled {
            None
        } else {
            tx.read_history(current.surrogate_id, current.version).await?
        };
        let history_id = match reusable {
            Some(previous) => {
                // Only the latest history row is retained
                entry.id = previous.id;
                tx.update_history(&entry).await?;
                trace!(
                    surrogate_id = record.surrogate_id,
                    from = current.version,
                    to = record.version,
                    "Renumbered history row"
                );
                previous.id
            }
            None => tx.insert_history(&entry).await?,
        };
        self.persist_tag_links(tx, record.surrogate_id, history_id, tags)
            .await?;

        debug!(
            resource_type = %record.resource_type,
            surrogate_id = record.surrogate_id,
            version = record.version,
            deleted = deleting,
            "Persisted version"
        );
        Ok(record)
    }

    /// Overwrites an existing version in place.
    ///
    /// Rewriting the current version updates the current record and its history
    /// row without incrementing. Rewriting a past version overwrites only its
    /// history row, and is skipped when the stored content is identical and
    /// unchanged writes are suppressed.
    pub async fn rewrite(
        &self,
        tx: &mut dyn Transaction,
        current: &ResourceRecord,
        public_id: &str,
        version: i64,
        encoded: &EncodedResource,
        tags: &[TagDefinition],
        provenance: &Provenance,
    ) -> StorageResult<RewriteResult> {
        let Some(existing) = tx.read_history(current.surrogate_id, version).await? else {
            return Err(ResourceError::VersionNotFound {
                resource_type: current.resource_type.clone(),
                id: public_id.to_string(),
                version,
            }
            .into());
        };

        let now = Utc::now();
        if version == current.version {
            let record = ResourceRecord {
                content_hash: encoded.hash.clone(),
                encoding: encoded.encoding,
                deleted_at: None,
                updated_at: now,
                has_tags: !tags.is_empty(),
                inline_tags: self.inline_snapshot(tags),
                ..current.clone()
            };
            if !tx.update_record(&record, current.version).await? {
                return Err(self.conflict(tx, current).await);
            }
            let mut entry = self.history_entry(&record, encoded, provenance);
            entry.id = existing.id;
            tx.update_history(&entry).await?;
            self.persist_tag_links(tx, record.surrogate_id, existing.id, tags)
                .await?;
        } else {
            if self.settings.suppress_updates_with_no_change
                && encoded.same_content(existing.text.as_deref(), existing.bytes.as_deref())
            {
                debug!(
                    surrogate_id = current.surrogate_id,
                    version, "History rewrite carries identical content, skipping"
                );
                return Ok(RewriteResult::Unchanged);
            }
            let entry = HistoryEntry {
                encoding: encoded.encoding,
                text: encoded.text.clone(),
                bytes: encoded.bytes.clone(),
                source_uri: provenance.source_uri.clone(),
                request_id: provenance.request_id.clone(),
                updated_at: now,
                inline_tags: self.inline_snapshot(tags),
                ..existing
            };
            tx.update_history(&entry).await?;
            if self.settings.tag_storage_mode == TagStorageMode::Versioned {
                let ids: Vec<i64> = tags.iter().filter_map(|t| t.id).collect();
                tx.replace_history_tags(entry.id, entry.surrogate_id, &ids)
                    .await?;
            }
        }

        debug!(surrogate_id = current.surrogate_id, version, "Rewrote history version");
        Ok(RewriteResult::Rewritten)
    }

    /// Replaces the tags of the current version without writing a new one.
    ///
    /// Under the versioned policy the current history row's links change only
    /// with `include_history`; otherwise only the record's links do.
    pub async fn replace_current_tags(
        &self,
        tx: &mut dyn Transaction,
        current: &ResourceRecord,
        tags: &[TagDefinition],
        include_history: bool,
    ) -> StorageResult<ResourceRecord> {
        let record = ResourceRecord {
            has_tags: !tags.is_empty(),
            inline_tags: self.inline_snapshot(tags),
            ..current.clone()
        };
        match self.settings.tag_storage_mode {
            TagStorageMode::Versioned => {
                let ids: Vec<i64> = tags.iter().filter_map(|t| t.id).collect();
                tx.replace_resource_tags(current.surrogate_id, &ids).await?;
                if include_history {
                    if let Some(entry) = tx
                        .read_history(current.surrogate_id, current.version)
                        .await?
                    {
                        tx.replace_history_tags(entry.id, entry.surrogate_id, &ids)
                            .await?;
                    }
                }
            }
            TagStorageMode::NonVersioned => {
                let ids: Vec<i64> = tags.iter().filter_map(|t| t.id).collect();
                tx.replace_resource_tags(current.surrogate_id, &ids).await?;
            }
            TagStorageMode::Inline => {
                if let Some(mut entry) = tx
                    .read_history(current.surrogate_id, current.version)
                    .await?
                {
                    entry.inline_tags = record.inline_tags.clone();
                    tx.update_history(&entry).await?;
                }
            }
        }
        if !tx.update_record(&record, current.version).await? {
            return Err(self.conflict(tx, current).await);
        }
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Renders the current version.
    pub async fn read(
        &self,
        tx: &mut dyn Transaction,
        lookup: &ResourceLookup,
        allow_deleted: bool,
    ) -> StorageResult<StoredResource> {
        let record = tx
            .read_record(lookup.surrogate_id)
            .await?
            .ok_or_else(|| StorageError::not_found(&lookup.resource_type, lookup.public_id()))?;

        if record.is_deleted() && !allow_deleted {
            return Err(ResourceError::Gone {
                resource_type: lookup.resource_type.clone(),
                id: lookup.public_id(),
                deleted_at: record.deleted_at,
            }
            .into());
        }

        let entry = tx
            .read_history(record.surrogate_id, record.version)
            .await?
            .ok_or_else(|| StorageError::not_found(&lookup.resource_type, lookup.public_id()))?;
        self.render(tx, lookup, &record, &entry).await
    }

    /// Renders one version.
    pub async fn vread(
        &self,
        tx: &mut dyn Transaction,
        lookup: &ResourceLookup,
        version: i64,
    ) -> StorageResult<StoredResource> {
        let record = tx
            .read_record(lookup.surrogate_id)
            .await?
            .ok_or_else(|| StorageError::not_found(&lookup.resource_type, lookup.public_id()))?;
        let entry = tx
            .read_history(lookup.surrogate_id, version)
            .await?
            .ok_or_else(|| ResourceError::VersionNotFound {
                resource_type: lookup.resource_type.clone(),
                id: lookup.public_id(),
                version,
            })?;
        self.render(tx, lookup, &record, &entry).await
    }

    /// Renders every retained version, newest first.
    pub async fn history(
        &self,
        tx: &mut dyn Transaction,
        lookup: &ResourceLookup,
    ) -> StorageResult<Vec<StoredResource>> {
        let record = tx
            .read_record(lookup.surrogate_id)
            .await?
            .ok_or_else(|| StorageError::not_found(&lookup.resource_type, lookup.public_id()))?;
        let entries = tx.list_history(lookup.surrogate_id).await?;
        let mut versions = Vec::with_capacity(entries.len());
        for entry in &entries {
            versions.push(self.render(tx, lookup, &record, entry).await?);
        }
        Ok(versions)
    }

    async fn render(
        &self,
        tx: &mut dyn Transaction,
        lookup: &ResourceLookup,
        record: &ResourceRecord,
        entry: &HistoryEntry,
    ) -> StorageResult<StoredResource> {
        let public_id = lookup.public_id();
        let stored = |content| {
            StoredResource::new(
                &lookup.resource_type,
                &public_id,
                entry.version,
                record.partition_id,
                content,
                entry.updated_at,
                record.published_at,
            )
        };

        if entry.is_deletion() {
            return Ok(stored(serde_json::Value::Null).with_deleted_at(entry.updated_at));
        }

        let content = codec::decode(entry.encoding, entry.text.as_deref(), entry.bytes.as_deref())?;
        let tags = self.version_tags(tx, record, entry).await?;
        let rendered = render_resource(
            content,
            &public_id,
            entry.version,
            entry.updated_at,
            entry.meta_source(),
            &tags,
            self.settings.sort_meta_on_read,
        );
        Ok(stored(rendered))
    }

    async fn version_tags(
        &self,
        tx: &mut dyn Transaction,
        record: &ResourceRecord,
        entry: &HistoryEntry,
    ) -> StorageResult<Vec<TagDefinition>> {
        match self.settings.tag_storage_mode {
            TagStorageMode::Versioned => tx.history_tags(entry.id).await,
            TagStorageMode::NonVersioned => tx.resource_tags(record.surrogate_id).await,
            TagStorageMode::Inline => Ok(entry.inline_tags.clone()),
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn inline_snapshot(&self, tags: &[TagDefinition]) -> Vec<TagDefinition> {
        if self.settings.tag_storage_mode == TagStorageMode::Inline {
            tags.iter()
                .map(|t| TagDefinition {
                    id: None,
                    ..t.clone()
                })
                .collect()
        } else {
            Vec::new()
        }
    }

    fn history_entry(
        &self,
        record: &ResourceRecord,
        encoded: &EncodedResource,
        provenance: &Provenance,
    ) -> HistoryEntry {
        HistoryEntry {
            id: 0,
            surrogate_id: record.surrogate_id,
            resource_type: record.resource_type.clone(),
            partition_id: record.partition_id,
            version: record.version,
            encoding: encoded.encoding,
            text: encoded.text.clone(),
            bytes: encoded.bytes.clone(),
            source_uri: provenance.source_uri.clone(),
            request_id: provenance.request_id.clone(),
            updated_at: record.updated_at,
            inline_tags: record.inline_tags.clone(),
        }
    }

    async fn persist_tag_links(
        &self,
        tx: &mut dyn Transaction,
        surrogate_id: i64,
        history_id: i64,
        tags: &[TagDefinition],
    ) -> StorageResult<()> {
        let ids: Vec<i64> = tags.iter().filter_map(|t| t.id).collect();
        match self.settings.tag_storage_mode {
            TagStorageMode::Versioned => {
                tx.replace_resource_tags(surrogate_id, &ids).await?;
                tx.replace_history_tags(history_id, surrogate_id, &ids)
                    .await
            }
            TagStorageMode::NonVersioned => tx.replace_resource_tags(surrogate_id, &ids).await,
            TagStorageMode::Inline => Ok(()),
        }
    }

    async fn conflict(&self, tx: &mut dyn Transaction, current: &ResourceRecord) -> StorageError {
        let actual_version = match tx.read_record(current.surrogate_id).await {
            Ok(Some(record)) => record.version,
            Ok(None) => 0,
            Err(e) => return e,
        };
        ConcurrencyError::VersionConflict {
            resource_type: current.resource_type.clone(),
            id: current.surrogate_id.to_string(),
            expected_version: current.version,
            actual_version,
        }
        .into()
    }
}
