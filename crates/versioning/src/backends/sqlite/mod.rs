//! SQLite backend implementation.
//!
//! Implements [`TransactionProvider`](crate::core::TransactionProvider) on top of
//! an r2d2 connection pool. Both in-memory databases (for tests) and file-based
//! databases (WAL mode, for development and small deployments) are supported.
//!
//! # Example
//!
//! ```no_run
//! use helios_versioning::backends::sqlite::SqliteBackend;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! ```sql
//! -- Identity map; surrogate ids are never reused
//! CREATE TABLE resource_identity (
//!     surrogate_id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     partition_id INTEGER,
//!     resource_type TEXT NOT NULL,
//!     external_id TEXT
//! );
//!
//! -- Current record, guarded by compare-and-increment on version
//! CREATE TABLE resources (
//!     surrogate_id INTEGER PRIMARY KEY,
//!     version INTEGER NOT NULL,
//!     content_hash TEXT,
//!     encoding TEXT NOT NULL,
//!     deleted_at TEXT,
//!     ...
//! );
//!
//! -- One row per retained version
//! CREATE TABLE resource_history (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     surrogate_id INTEGER NOT NULL,
//!     version INTEGER NOT NULL,
//!     encoding TEXT NOT NULL,
//!     text TEXT,
//!     bytes BLOB,
//!     ...
//!     UNIQUE (surrogate_id, version)
//! );
//!
//! -- Tag definitions and their links
//! CREATE TABLE tag_definitions (...);
//! CREATE TABLE resource_tags (surrogate_id, tag_id);
//! CREATE TABLE history_tags (history_id, surrogate_id, tag_id);
//! ```

mod backend;
mod schema;
mod transaction;

pub use backend::{SqliteBackend, SqliteBackendConfig};
pub use transaction::SqliteTransaction;
