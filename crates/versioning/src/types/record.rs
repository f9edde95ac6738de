//! Persisted rows: identities, current records and history entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::ResourceEncoding;
use crate::tags::TagDefinition;

/// A resolved resource identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLookup {
    /// Internal immutable key.
    pub surrogate_id: i64,
    /// Resource type.
    pub resource_type: String,
    /// Explicitly tracked external id, if any.
    pub external_id: Option<String>,
    /// Partition the resource lives in. `None` is the default partition.
    pub partition_id: Option<i32>,
    /// Tombstone timestamp of the current record, if deleted.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ResourceLookup {
    /// The identifier clients use: the explicit external id, or the decimal
    /// surrogate id.
    pub fn public_id(&self) -> String {
        self.external_id
            .clone()
            .unwrap_or_else(|| self.surrogate_id.to_string())
    }

    /// Returns `true` if the resource is tombstoned.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Index status of the current record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// Indexing ran as part of the write.
    Indexed,
    /// Indexing was deferred; change detection has not run.
    Pending,
}

/// The current record of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Internal key.
    pub surrogate_id: i64,
    /// Resource type.
    pub resource_type: String,
    /// Partition.
    pub partition_id: Option<i32>,
    /// Current version, starting at 1.
    pub version: i64,
    /// Hash of the current content. `None` for tombstones.
    pub content_hash: Option<String>,
    /// Encoding of the current content.
    pub encoding: ResourceEncoding,
    /// Index status.
    pub index_status: IndexStatus,
    /// Tombstone timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
    /// When the current version was written.
    pub updated_at: DateTime<Utc>,
    /// When version 1 was written.
    pub published_at: DateTime<Utc>,
    /// Whether any tag is attached.
    pub has_tags: bool,
    /// Tag snapshot when tags are stored inline.
    pub inline_tags: Vec<TagDefinition>,
}

impl ResourceRecord {
    /// Returns `true` if the record is tombstoned.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// An immutable snapshot of a resource at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Row id. `0` until inserted.
    pub id: i64,
    /// Owning resource.
    pub surrogate_id: i64,
    /// Resource type.
    pub resource_type: String,
    /// Partition.
    pub partition_id: Option<i32>,
    /// Version this entry represents.
    pub version: i64,
    /// Content encoding.
    pub encoding: ResourceEncoding,
    /// Text content.
    pub text: Option<String>,
    /// Binary content.
    pub bytes: Option<Vec<u8>>,
    /// Source URI from `meta.source`.
    pub source_uri: Option<String>,
    /// Request id that produced this version.
    pub request_id: Option<String>,
    /// When this version was written.
    pub updated_at: DateTime<Utc>,
    /// Tag snapshot when tags are stored inline.
    pub inline_tags: Vec<TagDefinition>,
}

impl HistoryEntry {
    /// Returns `true` if this entry is a deletion marker.
    pub fn is_deletion(&self) -> bool {
        self.encoding == ResourceEncoding::Deleted
    }

    /// Recombines the provenance into a `meta.source` value.
    pub fn meta_source(&self) -> Option<String> {
        crate::history::join_meta_source(self.source_uri.as_deref(), self.request_id.as_deref())
    }
}
