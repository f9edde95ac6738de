//! Write coordinator.
//!
//! [`ResourceEngine`] is the entry point for logical writes (create, update,
//! delete, patch, history rewrite), reads and meta operations. It sequences
//! validation, identity resolution, tag reconciliation, encoding, change
//! detection and persistence inside one backend transaction per operation,
//! and invokes [`WriteInterceptor`](crate::core::WriteInterceptor) hooks at
//! fixed points.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use helios_versioning::backends::sqlite::SqliteBackend;
//! use helios_versioning::engine::ResourceEngine;
//! use helios_versioning::partition::RequestContext;
//! use helios_versioning::types::{StorageOutcome, WriteRequest};
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let backend = SqliteBackend::in_memory().unwrap();
//! backend.init_schema().unwrap();
//! let engine = ResourceEngine::builder()
//!     .with_provider(Arc::new(backend))
//!     .build()
//!     .unwrap();
//!
//! let ctx = RequestContext::default();
//! let body = json!({"resourceType": "Widget", "color": "blue"});
//! let outcome = engine
//!     .update(&ctx, WriteRequest::new("Widget", body.clone()).with_id("w1"))
//!     .await
//!     .unwrap();
//! assert_eq!(outcome.status, StorageOutcome::Create);
//!
//! let again = engine
//!     .update(&ctx, WriteRequest::new("Widget", body).with_id("w1"))
//!     .await
//!     .unwrap();
//! assert_eq!(again.status, StorageOutcome::UpdateNoChange);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

mod builder;
mod resource_engine;
mod validation;

pub use builder::ResourceEngineBuilder;
pub use resource_engine::ResourceEngine;
pub use validation::{
    SUBSETTED_CODE, SUBSETTED_SYSTEM, reject_subsetted, validate_client_id, validate_id_syntax,
    validate_resource_type,
};
