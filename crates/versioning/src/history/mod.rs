//! Version and history manager.
//!
//! Owns the per-resource state machine:
//!
//! ```text
//! NonExistent --create--> Live(1)
//! Live(v) --update--> Live(v+1)        (only when something changed, or forced)
//! Live(v) --delete--> Deleted(v+1)
//! Deleted(v) --update--> Live(v+1)     (re-creation)
//! Live(v) | Deleted(v) --rewrite--> Live(v)
//! ```
//!
//! The current record is replaced with a compare-and-increment on its version,
//! so two writers racing on the same resource cannot both succeed.

mod manager;
mod provenance;
mod render;

pub use manager::{ChangeFlags, RecordChange, ResourceState, RewriteResult, VersionManager};
pub use provenance::{MAX_REQUEST_ID_LENGTH, MAX_SOURCE_URI_LENGTH, Provenance};
pub(crate) use provenance::join_meta_source;
pub use render::render_resource;
