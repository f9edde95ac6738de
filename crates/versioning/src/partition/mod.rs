//! Partition scoping.
//!
//! Every engine operation runs under a [`RequestContext`] naming the partitions
//! the caller may see. Identifier uniqueness and visibility are evaluated within
//! that scope: a resource stored outside the requested partitions is reported as
//! not found rather than leaking its existence.

mod context;
mod id;

pub use context::{
    HEADER_META_SNAPSHOT_MODE, HEADER_REWRITE_HISTORY, HEADER_UPSERT_EXISTENCE_CHECK,
    HEADER_UPSERT_EXISTENCE_CHECK_DISABLED, RequestContext,
};
pub use id::{PartitionFilter, RequestPartitionId};
