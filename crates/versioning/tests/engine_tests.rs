//! Write coordinator integration tests.
//!
//! These tests drive create, update, delete, patch and conditional create
//! through the engine against an in-memory SQLite backend.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use helios_versioning::config::{ClientIdStrategy, ServerIdStrategy, StorageSettings};
use helios_versioning::core::{ConditionalMatcher, ReferenceTargetValidator, WriteInterceptor};
use helios_versioning::engine::{SUBSETTED_CODE, SUBSETTED_SYSTEM};
use helios_versioning::error::{ErrorKind, StorageError, StorageResult, TransactionError};
use helios_versioning::partition::RequestContext;
use helios_versioning::types::{
    PatchDocument, ResourceKind, StorageOutcome, WriteOutcome, WriteRequest,
};

use common::{create_engine, engine_builder, widget};

// ============================================================================
// Test Collaborators
// ============================================================================

/// Records the hooks invoked, in order.
#[derive(Default)]
struct RecordingInterceptor {
    calls: Mutex<Vec<String>>,
}

impl RecordingInterceptor {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl WriteInterceptor for RecordingInterceptor {
    async fn pre_storage_client_assigned_id(
        &self,
        _ctx: &RequestContext,
        _resource_type: &str,
        id: &str,
        _resource: &Value,
    ) -> StorageResult<()> {
        self.calls.lock().push(format!("client_id:{}", id));
        Ok(())
    }

    async fn pre_storage_created(
        &self,
        _ctx: &RequestContext,
        _resource_type: &str,
        _resource: &Value,
    ) -> StorageResult<()> {
        self.calls.lock().push("created".to_string());
        Ok(())
    }

    async fn pre_commit_updated(
        &self,
        _ctx: &RequestContext,
        _resource_type: &str,
        previous: Option<&Value>,
        resource: &Value,
    ) -> StorageResult<()> {
        let before = previous.map(|p| p["color"].clone()).unwrap_or(Value::Null);
        self.calls
            .lock()
            .push(format!("updated:{}->{}", before, resource["color"]));
        Ok(())
    }

    async fn pre_commit_deleted(
        &self,
        _ctx: &RequestContext,
        _resource_type: &str,
        id: &str,
        _previous: Option<&Value>,
    ) -> StorageResult<()> {
        self.calls.lock().push(format!("deleted:{}", id));
        Ok(())
    }

    async fn post_commit(&self, _ctx: &RequestContext, outcome: &WriteOutcome) -> StorageResult<()> {
        self.calls
            .lock()
            .push(format!("committed:{}", outcome.status.message_code()));
        Ok(())
    }
}

/// Vetoes every update.
struct VetoUpdates;

#[async_trait]
impl WriteInterceptor for VetoUpdates {
    async fn pre_commit_updated(
        &self,
        _ctx: &RequestContext,
        _resource_type: &str,
        _previous: Option<&Value>,
        _resource: &Value,
    ) -> StorageResult<()> {
        Err(StorageError::invalid_request("updates are frozen"))
    }
}

/// Returns a fixed set of matches.
struct FixedMatcher(Vec<i64>);

#[async_trait]
impl ConditionalMatcher for FixedMatcher {
    async fn find_matches(
        &self,
        _ctx: &RequestContext,
        _resource_type: &str,
        _criteria: &str,
    ) -> StorageResult<Vec<i64>> {
        Ok(self.0.clone())
    }
}

// ============================================================================
// Create Tests
// ============================================================================

/// Test that a create allocates version 1 and ignores any id in the body.
#[tokio::test]
async fn test_create_assigns_server_id() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();

    let mut body = widget("blue");
    body["id"] = json!("client-chosen");
    let outcome = engine
        .create(&ctx, WriteRequest::new("Widget", body))
        .await
        .unwrap();

    assert!(outcome.created);
    assert!(!outcome.no_op);
    assert_eq!(outcome.version, 1);
    assert_eq!(outcome.status, StorageOutcome::Create);
    assert_ne!(outcome.id, "client-chosen");
    assert!(outcome.id.parse::<i64>().is_ok(), "sequential ids are numeric");
    assert_eq!(outcome.resource["id"], json!(outcome.id));
    assert_eq!(outcome.resource["meta"]["versionId"], "1");
    assert_eq!(outcome.versioned_reference(), format!("Widget/{}/_history/1", outcome.id));
}

/// Test that the UUID strategy assigns non-numeric ids.
#[tokio::test]
async fn test_create_with_uuid_strategy() {
    let engine = create_engine(
        StorageSettings::default().with_server_id_strategy(ServerIdStrategy::Uuid),
    );
    let ctx = RequestContext::default();

    let outcome = engine
        .create(&ctx, WriteRequest::new("Widget", widget("blue")))
        .await
        .unwrap();
    assert_eq!(outcome.id.len(), 36);
    assert!(uuid::Uuid::parse_str(&outcome.id).is_ok());

    let read = engine.read(&ctx, "Widget", &outcome.id).await.unwrap();
    assert_eq!(read.content()["color"], "blue");
}

/// Test the create, no-op update, changed update scenario under the
/// permissive id policy.
#[tokio::test]
async fn test_any_policy_uuid_scenario() {
    let engine = create_engine(
        StorageSettings::default()
            .with_client_id_strategy(ClientIdStrategy::Any)
            .with_server_id_strategy(ServerIdStrategy::Uuid),
    );
    let ctx = RequestContext::default();

    let created = engine
        .create(&ctx, WriteRequest::new("Widget", widget("blue")))
        .await
        .unwrap();
    assert!(created.created);
    assert_eq!(created.version, 1);

    let same = engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("blue")).with_id(created.id.clone()),
        )
        .await
        .unwrap();
    assert!(same.no_op);
    assert_eq!(same.version, 1);

    let changed = engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("red")).with_id(created.id.clone()),
        )
        .await
        .unwrap();
    assert!(!changed.no_op);
    assert_eq!(changed.version, 2);
}

// ============================================================================
// Validation Tests
// ============================================================================

/// Test that the body's resourceType must match the request.
#[tokio::test]
async fn test_resource_type_mismatch_is_unprocessable() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();

    let err = engine
        .create(&ctx, WriteRequest::new("Gadget", widget("blue")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unprocessable);
}

/// Test that the SUBSETTED security label blocks storage.
#[tokio::test]
async fn test_subsetted_resource_rejected() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();

    let body = json!({
        "resourceType": "Widget",
        "meta": {"security": [{"system": SUBSETTED_SYSTEM, "code": SUBSETTED_CODE}]}
    });
    let err = engine
        .update(&ctx, WriteRequest::new("Widget", body).with_id("w1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unprocessable);

    let read = engine.read(&ctx, "Widget", "w1").await.unwrap_err();
    assert_eq!(read.kind(), ErrorKind::NotFound);
}

/// Test that validator errors abort the write before persistence.
#[tokio::test]
async fn test_reference_validation() {
    let engine = engine_builder(StorageSettings::default())
        .with_kind(ResourceKind::new("Widget").with_reference_rule("owner", ["Person"]))
        .with_validator(Arc::new(ReferenceTargetValidator::new()))
        .build()
        .unwrap();
    let ctx = RequestContext::default();

    let bad = json!({"resourceType": "Widget", "owner": {"reference": "Device/d1"}});
    let err = engine
        .update(&ctx, WriteRequest::new("Widget", bad).with_id("w1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unprocessable);
    assert!(engine.read(&ctx, "Widget", "w1").await.is_err());

    let good = json!({"resourceType": "Widget", "owner": {"reference": "Person/p1"}});
    let outcome = engine
        .update(&ctx, WriteRequest::new("Widget", good).with_id("w1"))
        .await
        .unwrap();
    assert!(outcome.created);
}

/// Test the id checks performed on update.
#[tokio::test]
async fn test_update_id_checks() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();

    let err = engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(err.to_string().contains("as it has no ID"));

    let err = engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("bad id!"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    let err = engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("Gadget/w1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    let ok = engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("Widget/w1"))
        .await
        .unwrap();
    assert_eq!(ok.id, "w1");
}

// ============================================================================
// Update Tests
// ============================================================================

/// Test that each accepted write increments the version by exactly one.
#[tokio::test]
async fn test_versions_increment_by_one() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();

    let mut last = 0;
    for color in ["red", "green", "blue", "blue", "red"] {
        let outcome = engine
            .update(&ctx, WriteRequest::new("Widget", widget(color)).with_id("w1"))
            .await
            .unwrap();
        if outcome.no_op {
            assert_eq!(outcome.version, last);
        } else {
            assert_eq!(outcome.version, last + 1);
        }
        last = outcome.version;
    }
    assert_eq!(last, 4);
}

/// Test that identical updates are no-ops and forced updates are not.
#[tokio::test]
async fn test_idempotent_and_forced_updates() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();
    let request = WriteRequest::new("Widget", widget("blue")).with_id("w1");

    engine.update(&ctx, request.clone()).await.unwrap();
    let first = engine
        .update(&ctx, WriteRequest::new("Widget", widget("red")).with_id("w1"))
        .await
        .unwrap();
    assert_eq!(first.version, 2);
    assert_eq!(first.status, StorageOutcome::Update);

    let second = engine
        .update(&ctx, WriteRequest::new("Widget", widget("red")).with_id("w1"))
        .await
        .unwrap();
    assert!(second.no_op);
    assert_eq!(second.status, StorageOutcome::UpdateNoChange);
    assert_eq!(second.version, 2);
    assert_eq!(second.resource["color"], "red");

    let forced = engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("red")).with_id("w1").forced(),
        )
        .await
        .unwrap();
    assert_eq!(forced.version, 3);
}

/// Test that deferred indexing always writes a version and marks it pending.
#[tokio::test]
async fn test_update_without_indexing_always_increments() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();

    engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();
    let deferred = engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("blue"))
                .with_id("w1")
                .without_indexing(),
        )
        .await
        .unwrap();
    assert!(!deferred.no_op);
    assert_eq!(deferred.version, 2);
}

/// Test that a stale expected version is rejected.
#[tokio::test]
async fn test_expected_version_conflict() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();

    engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();
    engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("red"))
                .with_id("w1")
                .with_version(1),
        )
        .await
        .unwrap();

    let err = engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("green"))
                .with_id("w1")
                .with_version(1),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionConflict);
    assert_eq!(engine.read(&ctx, "Widget", "w1").await.unwrap().version(), 2);
}

// ============================================================================
// Delete Tests
// ============================================================================

/// Test the tombstone lifecycle: delete, repeated delete, re-creation.
#[tokio::test]
async fn test_delete_lifecycle() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();

    engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();

    let deleted = engine.delete(&ctx, "Widget", "w1", None).await.unwrap();
    assert_eq!(deleted.status, StorageOutcome::Delete);
    assert_eq!(deleted.version, 2);
    assert_eq!(deleted.previous.as_ref().unwrap()["color"], "blue");

    let err = engine.read(&ctx, "Widget", "w1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Gone);

    let marker = engine
        .read_including_deleted(&ctx, "Widget", "w1")
        .await
        .unwrap();
    assert!(marker.is_deleted());
    assert_eq!(marker.version(), 2);

    let again = engine.delete(&ctx, "Widget", "w1", None).await.unwrap();
    assert!(again.no_op);
    assert_eq!(again.status, StorageOutcome::DeleteAlreadyDeleted);
    assert_eq!(again.version, 2);

    let recreated = engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();
    assert!(recreated.created);
    assert_eq!(recreated.version, 3);
    assert_eq!(
        engine.read(&ctx, "Widget", "w1").await.unwrap().content()["color"],
        "blue"
    );
}

/// Test delete failure modes.
#[tokio::test]
async fn test_delete_errors() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();

    let err = engine.delete(&ctx, "Widget", "missing", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();
    let err = engine.delete(&ctx, "Widget", "w1", Some(7)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionConflict);

    let no_deletes = create_engine(StorageSettings {
        delete_enabled: false,
        ..StorageSettings::default()
    });
    let err = no_deletes.delete(&ctx, "Widget", "w1", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

// ============================================================================
// Patch Tests
// ============================================================================

/// Test JSON Patch and merge patch application.
#[tokio::test]
async fn test_patch() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();

    engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();

    let patch = PatchDocument::JsonPatch(json!([
        {"op": "replace", "path": "/color", "value": "red"}
    ]));
    let patched = engine
        .patch(&ctx, "Widget", "w1", &patch, None)
        .await
        .unwrap();
    assert_eq!(patched.status, StorageOutcome::Patch);
    assert_eq!(patched.version, 2);
    assert_eq!(patched.resource["color"], "red");

    let unchanged = engine
        .patch(&ctx, "Widget", "w1", &patch, Some(2))
        .await
        .unwrap();
    assert_eq!(unchanged.status, StorageOutcome::PatchNoChange);
    assert_eq!(unchanged.version, 2);

    let merge = PatchDocument::MergePatch(json!({"size": 3}));
    let merged = engine
        .patch(&ctx, "Widget", "w1", &merge, None)
        .await
        .unwrap();
    assert_eq!(merged.version, 3);
    assert_eq!(merged.resource["size"], 3);
    assert_eq!(merged.resource["color"], "red");
}

/// Test that a patch against a stale version or a tombstone fails.
#[tokio::test]
async fn test_patch_errors() {
    let engine = create_engine(StorageSettings::default());
    let ctx = RequestContext::default();
    let patch = PatchDocument::MergePatch(json!({"color": "red"}));

    engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();

    let err = engine
        .patch(&ctx, "Widget", "w1", &patch, Some(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionConflict);
    assert!(err.to_string().contains("is not the most recent version"));

    let err = engine
        .patch(&ctx, "Widget", "w1/_history/4", &patch, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionConflict);

    let retype = PatchDocument::MergePatch(json!({"resourceType": "Gadget"}));
    let err = engine
        .patch(&ctx, "Widget", "w1", &retype, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unprocessable);

    engine.delete(&ctx, "Widget", "w1", None).await.unwrap();
    let err = engine
        .patch(&ctx, "Widget", "w1", &patch, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Gone);
}

// ============================================================================
// Conditional Create Tests
// ============================================================================

/// Test that a single conditional match returns the existing resource.
#[tokio::test]
async fn test_conditional_create_single_match() {
    let ctx = RequestContext::default();
    let backend = common::create_backend();
    let plain = helios_versioning::engine::ResourceEngine::builder()
        .with_provider(backend.clone())
        .build()
        .unwrap();
    let existing = plain
        .create(&ctx, WriteRequest::new("Widget", widget("blue")))
        .await
        .unwrap();
    let surrogate_id: i64 = existing.id.parse().unwrap();

    let engine = helios_versioning::engine::ResourceEngine::builder()
        .with_provider(backend)
        .with_matcher(Arc::new(FixedMatcher(vec![surrogate_id])))
        .build()
        .unwrap();
    let outcome = engine
        .create(
            &ctx,
            WriteRequest::new("Widget", widget("red")).with_match_criteria("color=blue"),
        )
        .await
        .unwrap();
    assert!(outcome.no_op);
    assert!(!outcome.created);
    assert_eq!(outcome.status, StorageOutcome::CreateConditionalMatch);
    assert_eq!(outcome.id, existing.id);
    assert_eq!(outcome.resource["color"], "blue");
}

/// Test conditional create with zero and multiple matches.
#[tokio::test]
async fn test_conditional_create_no_match_and_multiple() {
    let ctx = RequestContext::default();

    let engine = engine_builder(StorageSettings::default())
        .with_matcher(Arc::new(FixedMatcher(vec![])))
        .build()
        .unwrap();
    let created = engine
        .create(
            &ctx,
            WriteRequest::new("Widget", widget("blue")).with_match_criteria("color=blue"),
        )
        .await
        .unwrap();
    assert!(created.created);

    let engine = engine_builder(StorageSettings::default())
        .with_matcher(Arc::new(FixedMatcher(vec![1, 2])))
        .build()
        .unwrap();
    let err = engine
        .create(
            &ctx,
            WriteRequest::new("Widget", widget("blue")).with_match_criteria("color=blue"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Transaction(TransactionError::MultipleMatches { count: 2, .. })
    ));
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    let no_matcher = create_engine(StorageSettings::default());
    let err = no_matcher
        .create(
            &ctx,
            WriteRequest::new("Widget", widget("blue")).with_match_criteria("color=blue"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

// ============================================================================
// Conditional Update Tests
// ============================================================================

/// Test that a single conditional match is updated in place.
#[tokio::test]
async fn test_conditional_update_single_match() {
    let ctx = RequestContext::default();
    let backend = common::create_backend();
    let plain = helios_versioning::engine::ResourceEngine::builder()
        .with_provider(backend.clone())
        .build()
        .unwrap();
    let existing = plain
        .create(&ctx, WriteRequest::new("Widget", widget("blue")))
        .await
        .unwrap();
    let surrogate_id: i64 = existing.id.parse().unwrap();

    let engine = helios_versioning::engine::ResourceEngine::builder()
        .with_provider(backend)
        .with_matcher(Arc::new(FixedMatcher(vec![surrogate_id])))
        .build()
        .unwrap();

    // No id is needed when criteria are given
    let updated = engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("red")).with_match_criteria("color=blue"),
        )
        .await
        .unwrap();
    assert_eq!(updated.status, StorageOutcome::Update);
    assert_eq!(updated.id, existing.id);
    assert_eq!(updated.version, 2);
    assert_eq!(updated.previous.unwrap()["color"], "blue");

    let err = engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("green"))
                .with_id("other")
                .with_match_criteria("color=red"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(err.to_string().contains("does not match the conditional URL"));

    let same_id = engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("green"))
                .with_id(format!("Widget/{}", existing.id))
                .with_match_criteria("color=red"),
        )
        .await
        .unwrap();
    assert_eq!(same_id.version, 3);
    assert_eq!(
        engine.read(&ctx, "Widget", &existing.id).await.unwrap().content()["color"],
        "green"
    );
}

/// Test conditional update with zero and multiple matches.
#[tokio::test]
async fn test_conditional_update_no_match_and_multiple() {
    let ctx = RequestContext::default();

    let engine = engine_builder(StorageSettings::default())
        .with_matcher(Arc::new(FixedMatcher(vec![])))
        .build()
        .unwrap();
    let server_assigned = engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("blue")).with_match_criteria("color=blue"),
        )
        .await
        .unwrap();
    assert!(server_assigned.created);
    assert_eq!(server_assigned.status, StorageOutcome::Create);
    assert!(server_assigned.id.parse::<i64>().is_ok());

    let client_assigned = engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("red"))
                .with_id("w9")
                .with_match_criteria("color=red"),
        )
        .await
        .unwrap();
    assert!(client_assigned.created);
    assert_eq!(client_assigned.id, "w9");

    let engine = engine_builder(StorageSettings::default())
        .with_matcher(Arc::new(FixedMatcher(vec![1, 2])))
        .build()
        .unwrap();
    let err = engine
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("blue")).with_match_criteria("color=blue"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Transaction(TransactionError::MultipleMatches { ref operation, count: 2 })
            if operation == "update"
    ));
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    let no_matcher = create_engine(StorageSettings::default());
    let err = no_matcher
        .update(
            &ctx,
            WriteRequest::new("Widget", widget("blue")).with_match_criteria("color=blue"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(err.to_string().contains("requires a configured matcher"));
}

// ============================================================================
// Interceptor Tests
// ============================================================================

/// Test the hooks invoked across a resource's lifecycle.
#[tokio::test]
async fn test_interceptor_hooks() {
    let recorder = Arc::new(RecordingInterceptor::default());
    let engine = engine_builder(StorageSettings::default())
        .with_interceptor(recorder.clone())
        .build()
        .unwrap();
    let ctx = RequestContext::default();

    engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();
    engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();
    engine
        .update(&ctx, WriteRequest::new("Widget", widget("red")).with_id("w1"))
        .await
        .unwrap();
    engine.delete(&ctx, "Widget", "w1", None).await.unwrap();
    engine.delete(&ctx, "Widget", "w1", None).await.unwrap();

    assert_eq!(
        recorder.calls(),
        vec![
            "client_id:w1",
            "created",
            "committed:SUCCESSFUL_CREATE",
            "updated:\"blue\"->\"red\"",
            "committed:SUCCESSFUL_UPDATE",
            "deleted:w1",
            "committed:SUCCESSFUL_DELETE",
        ]
    );
}

/// Test that a vetoing interceptor rolls back the whole write.
#[tokio::test]
async fn test_interceptor_veto_rolls_back() {
    let engine = engine_builder(StorageSettings::default())
        .with_interceptor(Arc::new(VetoUpdates))
        .build()
        .unwrap();
    let ctx = RequestContext::default();

    engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();
    let err = engine
        .update(&ctx, WriteRequest::new("Widget", widget("red")).with_id("w1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    let current = engine.read(&ctx, "Widget", "w1").await.unwrap();
    assert_eq!(current.version(), 1);
    assert_eq!(current.content()["color"], "blue");
    assert_eq!(engine.history(&ctx, "Widget", "w1").await.unwrap().len(), 1);
}

/// Test that mass ingestion skips staging the previous snapshot.
#[tokio::test]
async fn test_mass_ingestion_skips_previous() {
    let engine = create_engine(StorageSettings::default().with_mass_ingestion_mode(true));
    let ctx = RequestContext::default();

    engine
        .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
        .await
        .unwrap();
    let updated = engine
        .update(&ctx, WriteRequest::new("Widget", widget("red")).with_id("w1"))
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert!(updated.previous.is_none());
}
