//! Helios FHIR Server Resource Versioning
//!
//! This crate is the versioning and identity resolution engine beneath a FHIR
//! server's storage layer. It turns logical writes into versioned persistent
//! state and renders that state back into resources.
//!
//! # Features
//!
//! - **Versioning**: Monotonic versions with full history, tombstones,
//!   re-creation and optional in-place history rewrite
//! - **Change detection**: Content hashes suppress writes that change nothing
//! - **Identity resolution**: Public ids map to surrogate ids under a
//!   configurable client id policy, scoped by partition
//! - **Tags**: Tags, security labels and profiles stored versioned,
//!   non-versioned or inline, reconciled with snapshot and merge semantics
//! - **Content codec**: Plain or gzip-compressed JSON with volatile fields
//!   stripped before hashing
//!
//! # Backend Features
//!
//! - `sqlite` (default) - SQLite with in-memory and file modes
//!
//! # Architecture
//!
//! - [`engine`] - The write coordinator and its builder
//! - [`identity`] - Identity resolution and caching
//! - [`tags`] - Tag definitions and reconciliation
//! - [`history`] - The version state machine and rendering
//! - [`codec`] - Content encoding and hashing
//! - [`partition`] - Partition scoping and request context
//! - [`core`] - Backend and collaborator traits
//! - [`backends`] - Backend implementations
//! - [`config`] - Storage settings
//! - [`types`] - Shared types
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use helios_versioning::backends::sqlite::SqliteBackend;
//! use helios_versioning::engine::ResourceEngine;
//! use helios_versioning::partition::RequestContext;
//! use helios_versioning::types::WriteRequest;
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let backend = SqliteBackend::in_memory().unwrap();
//! backend.init_schema().unwrap();
//! let engine = ResourceEngine::builder()
//!     .with_provider(Arc::new(backend))
//!     .build()
//!     .unwrap();
//!
//! let ctx = RequestContext::default();
//! let created = engine
//!     .create(&ctx, WriteRequest::new("Widget", json!({"resourceType": "Widget"})))
//!     .await
//!     .unwrap();
//! assert_eq!(created.version, 1);
//!
//! let deleted = engine.delete(&ctx, "Widget", &created.id, None).await.unwrap();
//! assert_eq!(deleted.version, 2);
//! assert_eq!(engine.history(&ctx, "Widget", &created.id).await.unwrap().len(), 2);
//! # });
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod codec;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod history;
pub mod identity;
pub mod partition;
pub mod tags;
pub mod types;

// Re-export commonly used types at crate root
pub use config::StorageSettings;
pub use engine::{ResourceEngine, ResourceEngineBuilder};
pub use error::{StorageError, StorageResult};
pub use partition::{RequestContext, RequestPartitionId};
pub use types::{StorageOutcome, StoredResource, WriteOutcome, WriteRequest};

// Re-export core traits
pub use core::{
    ConditionalMatcher, ContentValidator, Transaction, TransactionProvider, WriteInterceptor,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
