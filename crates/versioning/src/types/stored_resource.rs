//! Stored resource types.
//!
//! This module defines the [`StoredResource`] type returned by reads: a resource
//! version rendered back to JSON, with `id` and `meta` repopulated from the
//! persisted record and history entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A resource version as returned by reads.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use helios_versioning::types::StoredResource;
/// use serde_json::json;
///
/// let now = Utc::now();
/// let resource = StoredResource::new(
///     "Widget",
///     "w1",
///     2,
///     None,
///     json!({"resourceType": "Widget", "id": "w1"}),
///     now,
///     now,
/// );
///
/// assert_eq!(resource.url(), "Widget/w1");
/// assert_eq!(resource.versioned_url(), "Widget/w1/_history/2");
/// assert_eq!(resource.etag(), "W/\"2\"");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResource {
    /// The resource type.
    resource_type: String,

    /// The public id.
    id: String,

    /// The version represented.
    version: i64,

    /// The partition the resource lives in.
    partition_id: Option<i32>,

    /// The rendered resource. `Null` for deletion markers.
    content: Value,

    /// When this version was written.
    last_updated: DateTime<Utc>,

    /// When version 1 was written.
    published_at: DateTime<Utc>,

    /// Tombstone timestamp, when this version is a deletion marker.
    deleted_at: Option<DateTime<Utc>>,
}

impl StoredResource {
    /// Creates a stored resource.
    pub fn new(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        version: i64,
        partition_id: Option<i32>,
        content: Value,
        last_updated: DateTime<Utc>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version,
            partition_id,
            content,
            last_updated,
            published_at,
            deleted_at: None,
        }
    }

    /// Marks this version as a deletion marker.
    pub fn with_deleted_at(mut self, deleted_at: DateTime<Utc>) -> Self {
        self.deleted_at = Some(deleted_at);
        self.content = Value::Null;
        self
    }

    /// Returns the resource type.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the public id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the version.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns the partition.
    pub fn partition_id(&self) -> Option<i32> {
        self.partition_id
    }

    /// Returns the rendered content.
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Consumes the resource and returns its content.
    pub fn into_content(self) -> Value {
        self.content
    }

    /// Returns when this version was written.
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Returns when version 1 was written.
    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// Returns the tombstone timestamp.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Returns `true` if this version is a deletion marker.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Weak ETag derived from the version.
    pub fn etag(&self) -> String {
        format!("W/\"{}\"", self.version)
    }

    /// Relative URL `Type/id`.
    pub fn url(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// Relative URL `Type/id/_history/version`.
    pub fn versioned_url(&self) -> String {
        format!("{}/{}/_history/{}", self.resource_type, self.id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deletion_marker() {
        let now = Utc::now();
        let resource = StoredResource::new("Widget", "w1", 3, Some(1), json!({"a": 1}), now, now)
            .with_deleted_at(now);
        assert!(resource.is_deleted());
        assert!(resource.content().is_null());
        assert_eq!(resource.partition_id(), Some(1));
    }
}
