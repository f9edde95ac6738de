//! Core types shared across the engine.
//!
//! - [`ResourceLookup`], [`ResourceRecord`] and [`HistoryEntry`] mirror the
//!   persisted rows.
//! - [`WriteRequest`], [`PatchDocument`] and [`ResourceId`] describe writes.
//! - [`WriteOutcome`] and [`StorageOutcome`] describe their results.
//! - [`StoredResource`] is a rendered resource version returned by reads.
//! - [`ResourceKind`] and [`ResourceKindRegistry`] carry per-type behaviour.

mod kind;
mod outcome;
mod record;
mod request;
mod stored_resource;

pub use kind::{ReferenceRule, ResourceKind, ResourceKindRegistry};
pub use outcome::{StorageOutcome, WriteOutcome};
pub use record::{HistoryEntry, IndexStatus, ResourceLookup, ResourceRecord};
pub use request::{PatchDocument, ResourceId, WriteRequest};
pub use stored_resource::StoredResource;
