//! Conditional create and update matching.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::partition::RequestContext;

/// Resolves conditional match criteria to the surrogate ids of matching
/// resources.
///
/// This is the seam to the search subsystem; the engine only needs to know how
/// many resources match and which one when there is exactly one.
#[async_trait]
pub trait ConditionalMatcher: Send + Sync {
    /// Returns the surrogate ids of resources of `resource_type` matching
    /// `criteria` within the request's partitions.
    async fn find_matches(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        criteria: &str,
    ) -> StorageResult<Vec<i64>>;
}
