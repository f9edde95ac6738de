//! Identity resolution service.
//!
//! Maps `(partition, type, external id)` to the internal surrogate id and back.
//!
//! An identity is tracked explicitly (with its external id stored) when the id
//! is not purely numeric, or when the client id policy is
//! [`ClientIdStrategy::Any`](crate::config::ClientIdStrategy::Any). Otherwise
//! the decimal form of the surrogate id *is* the public id and resolution is a
//! parse plus an existence check.
//!
//! Lookups go through an [`IdentityCache`]. A committed identity never
//! changes, so published entries never need invalidation. An identity assigned
//! inside a transaction disappears again if that transaction rolls back, so
//! the resolver only stages cache entries on the transaction
//! ([`StagedIdentity`]); they are published with
//! [`IdentityResolution::publish`] once the commit succeeds. The cache does not
//! record deletion state: [`IdentityResolution::resolve`] reads it from the
//! current record.

mod cache;
mod resolver;

pub use cache::{CachedIdentity, IdentityCache, StagedIdentity};
pub use resolver::{
    IdentityResolution, IdentityResolver, MISSING_PARAMETER_VALUE, is_numeric_id,
    strip_type_prefix,
};
