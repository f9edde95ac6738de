//! Tag reconciliation engine.
//!
//! Tags, security labels and profiles are mutable metadata that are tracked
//! outside the content hash. On every write the incoming set is reconciled
//! with the previously persisted set under the deployment's
//! [`TagStorageMode`](crate::config::TagStorageMode):
//!
//! | Mode | Persisted as | Update semantics |
//! |------|--------------|------------------|
//! | `Versioned` | record links + per-history links | merge |
//! | `NonVersioned` | record links | merge |
//! | `Inline` | JSON snapshot on record and history rows | full replace |
//!
//! Under merge, previously persisted tags missing from the incoming resource
//! are kept (and echoed back onto it) unless their type is snapshot-replaced on
//! this request, or their system is always dropped.

mod definition;
mod reconcile;
mod service;

pub use definition::{
    TagDefinition, TagKey, TagType, apply_to_meta, dedupe, extract_tags, sort_definitions,
    sort_meta,
};
pub use reconcile::{ReconcilePolicy, TagPlan, reconcile};
pub use service::{TagReconciler, TagReconciliation};
