//! Request context for engine operations.
//!
//! This module defines [`RequestContext`], which carries everything the engine
//! needs to know about the caller of a single operation: the partition scope,
//! request id, whether the call originates from the system itself, and the
//! header-derived hints that adjust reconciliation behaviour.

use std::collections::{BTreeSet, HashMap};

use super::id::RequestPartitionId;
use crate::tags::TagType;

/// Header listing the tag types that are snapshot-replaced on this request.
pub const HEADER_META_SNAPSHOT_MODE: &str = "X-Meta-Snapshot-Mode";

/// Header that disables the existence lookup of an update, forcing a create.
///
/// The misspelling is part of the established header name.
pub const HEADER_UPSERT_EXISTENCE_CHECK: &str = "X-Upsert-Extistence-Check";

/// Value of [`HEADER_UPSERT_EXISTENCE_CHECK`] that disables the lookup.
pub const HEADER_UPSERT_EXISTENCE_CHECK_DISABLED: &str = "disabled";

/// Header requesting that an update rewrite a specific history version.
pub const HEADER_REWRITE_HISTORY: &str = "X-Rewrite-History";

/// Context required for every engine operation.
///
/// # Examples
///
/// ```
/// use helios_versioning::partition::{RequestContext, RequestPartitionId};
/// use helios_versioning::tags::TagType;
///
/// let ctx = RequestContext::new(RequestPartitionId::from_partition_id(1))
///     .with_request_id("req-42")
///     .with_header("X-Meta-Snapshot-Mode", "TAG, PROFILE");
///
/// assert_eq!(ctx.request_id(), Some("req-42"));
/// let modes = ctx.tag_snapshot_modes().unwrap();
/// assert!(modes.contains(&TagType::Label));
/// assert!(!modes.contains(&TagType::SecurityLabel));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// The partitions visible to the request.
    partition: RequestPartitionId,
    /// Optional request id recorded as history provenance.
    request_id: Option<String>,
    /// Whether the request originates from the system rather than a client.
    system_request: bool,
    /// Request headers keyed by lowercase name.
    headers: HashMap<String, Vec<String>>,
}

impl RequestContext {
    /// Creates a context scoped to the given partitions.
    pub fn new(partition: RequestPartitionId) -> Self {
        Self {
            partition,
            ..Self::default()
        }
    }

    /// Creates a system request context scoped to the default partition.
    pub fn system() -> Self {
        Self::default().as_system_request()
    }

    /// Sets the request id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Adds a header value. Header names are case-insensitive.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// Marks the request as originating from the system.
    pub fn as_system_request(mut self) -> Self {
        self.system_request = true;
        self
    }

    /// Returns the partition scope.
    pub fn partition(&self) -> &RequestPartitionId {
        &self.partition
    }

    /// Returns the request id, if set.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Returns `true` for system requests.
    pub fn is_system_request(&self) -> bool {
        self.system_request
    }

    /// Returns the first value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).first().map(String::as_str)
    }

    /// Returns every value of a header.
    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The tag types the caller wants snapshot-replaced, if the caller said so.
    ///
    /// Returns `None` when the header is absent, so the deployment default applies.
    /// Unknown tokens are ignored.
    pub fn tag_snapshot_modes(&self) -> Option<BTreeSet<TagType>> {
        let values = self.header_values(HEADER_META_SNAPSHOT_MODE);
        if values.is_empty() {
            return None;
        }
        let modes = values
            .iter()
            .flat_map(|v| v.split(','))
            .filter_map(|token| TagType::from_snapshot_token(token.trim()))
            .collect();
        Some(modes)
    }

    /// Returns `true` if the caller disabled the update existence check.
    pub fn upsert_existence_check_disabled(&self) -> bool {
        self.header(HEADER_UPSERT_EXISTENCE_CHECK)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case(HEADER_UPSERT_EXISTENCE_CHECK_DISABLED))
    }

    /// Returns `true` if the caller asked for a history rewrite.
    pub fn rewrite_history_requested(&self) -> bool {
        self.header(HEADER_REWRITE_HISTORY)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_context() {
        let ctx = RequestContext::default();
        assert!(ctx.partition().is_default_partition());
        assert!(ctx.request_id().is_none());
        assert!(!ctx.is_system_request());
        assert!(ctx.tag_snapshot_modes().is_none());
    }

    #[test]
    fn test_system_context() {
        assert!(RequestContext::system().is_system_request());
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let ctx = RequestContext::default().with_header("x-upsert-extistence-check", "Disabled");
        assert!(ctx.upsert_existence_check_disabled());
        assert_eq!(ctx.header("X-UPSERT-EXTISTENCE-CHECK"), Some("Disabled"));
    }

    #[test]
    fn test_snapshot_modes_parsing() {
        let ctx = RequestContext::default()
            .with_header(HEADER_META_SNAPSHOT_MODE, "SECURITY_LABEL")
            .with_header(HEADER_META_SNAPSHOT_MODE, "bogus, TAG");
        let modes = ctx.tag_snapshot_modes().unwrap();
        assert_eq!(modes.len(), 2);
        assert!(modes.contains(&TagType::SecurityLabel));
        assert!(modes.contains(&TagType::Label));
    }

    #[test]
    fn test_snapshot_header_with_only_unknown_tokens() {
        let ctx = RequestContext::default().with_header(HEADER_META_SNAPSHOT_MODE, "nothing");
        assert_eq!(ctx.tag_snapshot_modes(), Some(BTreeSet::new()));
    }

    #[test]
    fn test_rewrite_history_flag() {
        let ctx = RequestContext::default().with_header(HEADER_REWRITE_HISTORY, "true");
        assert!(ctx.rewrite_history_requested());
        assert!(!RequestContext::default().rewrite_history_requested());
    }
}
