//! Concurrency tests against a file-backed SQLite database.
//!
//! Writers are serialized by the backend's immediate transactions, so these
//! tests check the outcomes the engine guarantees under contention rather than
//! any particular interleaving.

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use helios_versioning::backends::sqlite::SqliteBackend;
use helios_versioning::config::StorageSettings;
use helios_versioning::core::TransactionProvider;
use helios_versioning::engine::ResourceEngine;
use helios_versioning::error::ErrorKind;
use helios_versioning::identity::{IdentityResolution, IdentityResolver};
use helios_versioning::partition::RequestContext;
use helios_versioning::types::WriteRequest;

use common::{init_tracing, widget};

fn create_file_backend(dir: &TempDir) -> Arc<SqliteBackend> {
    let backend = SqliteBackend::open(dir.path().join("versioning.db"))
        .expect("Failed to open SQLite database");
    backend.init_schema().expect("Failed to initialize schema");
    Arc::new(backend)
}

fn create_file_engine(dir: &TempDir) -> Arc<ResourceEngine> {
    let engine = ResourceEngine::builder()
        .with_provider(create_file_backend(dir))
        .with_settings(StorageSettings::default())
        .build()
        .expect("Failed to build engine");
    Arc::new(engine)
}

// ============================================================================
// Optimistic Concurrency
// ============================================================================

/// Test that of two updates expecting the same version, exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_same_expected_version() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let engine = create_file_engine(&dir);
    let ctx = RequestContext::default();

    engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();

    let handles: Vec<_> = ["red", "green"]
        .into_iter()
        .map(|color| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .update(
                        &RequestContext::default(),
                        WriteRequest::new("Widget", widget(color))
                            .with_id("w1")
                            .with_version(1),
                    )
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                assert_eq!(outcome.version, 2);
                successes += 1;
            }
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::VersionConflict);
                conflicts += 1;
            }
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);

    let current = engine.read(&ctx, "Widget", "w1").await.unwrap();
    assert_eq!(current.version(), 2);
    assert_eq!(engine.history(&ctx, "Widget", "w1").await.unwrap().len(), 2);
}

/// Test that unconditional concurrent updates each produce a distinct version.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_are_serialized() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let engine = create_file_engine(&dir);
    let ctx = RequestContext::default();

    engine
        .update(&ctx, WriteRequest::new("Widget", widget("start")).with_id("w1"))
        .await
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .update(
                        &RequestContext::default(),
                        WriteRequest::new("Widget", widget(&format!("color-{}", i)))
                            .with_id("w1"),
                    )
                    .await
            })
        })
        .collect();

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap().unwrap().version);
    }
    versions.sort();
    assert_eq!(versions, vec![2, 3, 4, 5]);
}

// ============================================================================
// Identity Assignment
// ============================================================================

/// Test that concurrent resolve-or-assign calls agree on one identity.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolve_or_assign() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let backend = create_file_backend(&dir);
    let settings = Arc::new(StorageSettings::default());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let backend = backend.clone();
            // Separate resolvers so no answer comes from a shared cache
            let resolver = IdentityResolver::new(settings.clone());
            tokio::spawn(async move {
                let ctx = RequestContext::default();
                let mut tx = backend.begin(&ctx).await?;
                let (lookup, _) = resolver
                    .resolve_or_assign(&mut *tx, ctx.partition(), "Widget", "shared-key")
                    .await?;
                tx.commit().await?;
                Ok::<_, helios_versioning::StorageError>(lookup.surrogate_id)
            })
        })
        .collect();

    let mut surrogates = Vec::new();
    for handle in handles {
        surrogates.push(handle.await.unwrap().unwrap());
    }
    surrogates.dedup();
    assert_eq!(surrogates.len(), 1);
}
