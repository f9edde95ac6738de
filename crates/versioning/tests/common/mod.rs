//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};

use helios_versioning::backends::sqlite::SqliteBackend;
use helios_versioning::config::StorageSettings;
use helios_versioning::engine::{ResourceEngine, ResourceEngineBuilder};

pub const TAG_SYSTEM: &str = "http://example.org/tags";

/// Routes engine logs to the test output. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn create_backend() -> Arc<SqliteBackend> {
    let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
    backend.init_schema().expect("Failed to initialize schema");
    Arc::new(backend)
}

/// Builder wired to a fresh in-memory backend.
pub fn engine_builder(settings: StorageSettings) -> ResourceEngineBuilder {
    ResourceEngine::builder()
        .with_provider(create_backend())
        .with_settings(settings)
}

pub fn create_engine(settings: StorageSettings) -> ResourceEngine {
    engine_builder(settings)
        .build()
        .expect("Failed to build engine")
}

pub fn widget(color: &str) -> Value {
    json!({
        "resourceType": "Widget",
        "color": color
    })
}

/// A widget carrying labels from [`TAG_SYSTEM`].
pub fn tagged_widget(color: &str, codes: &[&str]) -> Value {
    let tags: Vec<Value> = codes
        .iter()
        .map(|code| json!({"system": TAG_SYSTEM, "code": code}))
        .collect();
    json!({
        "resourceType": "Widget",
        "color": color,
        "meta": {"tag": tags}
    })
}

/// Sorted label codes found in `meta.tag`.
pub fn tag_codes(resource: &Value) -> Vec<String> {
    let mut codes: Vec<String> = resource["meta"]["tag"]
        .as_array()
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t["code"].as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    codes.sort();
    codes
}
