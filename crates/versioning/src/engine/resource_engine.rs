//! The write coordinator.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::codec::{self, EncodedResource};
use crate::config::{ClientIdStrategy, ServerIdStrategy, StorageSettings};
use crate::core::{
    ConditionalMatcher, ContentValidator, Transaction, TransactionProvider, WriteInterceptor,
};
use crate::error::{
    ConcurrencyError, ErrorKind, ResourceError, StorageError, StorageResult, TransactionError,
    ValidationError,
};
use crate::history::{
    ChangeFlags, Provenance, RecordChange, RewriteResult, VersionManager, render_resource,
};
use crate::identity::{IdentityResolution, is_numeric_id};
use crate::partition::RequestContext;
use crate::tags::{
    ReconcilePolicy, TagDefinition, TagKey, TagPlan, TagReconciliation, dedupe, extract_tags,
    sort_definitions,
};
use crate::types::{
    PatchDocument, ResourceId, ResourceKindRegistry, ResourceLookup, ResourceRecord,
    StorageOutcome, StoredResource, WriteOutcome, WriteRequest,
};

use super::builder::ResourceEngineBuilder;
use super::validation::{
    check_findings, reject_subsetted, validate_client_id, validate_id_syntax,
    validate_resource_type,
};

/// Which operation an in-place update serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateKind {
    Update,
    Patch,
}

impl UpdateKind {
    /// Statuses reported for a changed and an unchanged write.
    fn statuses(self) -> (StorageOutcome, StorageOutcome) {
        match self {
            UpdateKind::Update => (StorageOutcome::Update, StorageOutcome::UpdateNoChange),
            UpdateKind::Patch => (StorageOutcome::Patch, StorageOutcome::PatchNoChange),
        }
    }
}

/// Coordinates logical writes and reads of versioned resources.
///
/// Every operation runs in a single backend transaction. Identity resolution,
/// tag reconciliation, change detection and persistence of a write either all
/// commit or all roll back, and interceptor vetoes roll back the whole write.
pub struct ResourceEngine {
    pub(super) settings: Arc<StorageSettings>,
    pub(super) provider: Arc<dyn TransactionProvider>,
    pub(super) identities: Arc<dyn IdentityResolution>,
    pub(super) tags: Arc<dyn TagReconciliation>,
    pub(super) versions: VersionManager,
    pub(super) kinds: ResourceKindRegistry,
    pub(super) validator: Option<Arc<dyn ContentValidator>>,
    pub(super) matcher: Option<Arc<dyn ConditionalMatcher>>,
    pub(super) interceptors: Vec<Arc<dyn WriteInterceptor>>,
}

impl fmt::Debug for ResourceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceEngine")
            .field("settings", &self.settings)
            .field("kinds", &self.kinds.len())
            .field("has_validator", &self.validator.is_some())
            .field("has_matcher", &self.matcher.is_some())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl ResourceEngine {
    /// Returns a builder.
    pub fn builder() -> ResourceEngineBuilder {
        ResourceEngineBuilder::new()
    }

    /// Returns the settings in effect.
    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    /// Returns the identity resolver.
    pub fn identities(&self) -> &Arc<dyn IdentityResolution> {
        &self.identities
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Creates a resource under a server-assigned id.
    ///
    /// Any id in the body is ignored. With match criteria, an existing match is
    /// returned instead of creating, and more than one match is an error.
    #[instrument(skip(self, ctx, request), fields(resource_type = %request.resource_type))]
    pub async fn create(
        &self,
        ctx: &RequestContext,
        request: WriteRequest,
    ) -> StorageResult<WriteOutcome> {
        self.validate_content(&request.resource_type, &request.content)
            .await?;

        if let Some(criteria) = request.match_criteria.as_deref() {
            let matched = self
                .single_match(ctx, &request.resource_type, criteria, "create")
                .await?;
            if let Some(surrogate_id) = matched {
                return self
                    .conditional_match(ctx, &request.resource_type, surrogate_id)
                    .await;
            }
        }

        let mut tx = self.provider.begin(ctx).await?;
        let outcome = self.create_in(&mut *tx, ctx, &request, None).await?;
        self.commit(tx).await?;
        self.after_commit(ctx, outcome).await
    }

    /// Updates a resource, creating it under the client's id when it does not
    /// exist.
    ///
    /// With match criteria the target is found by the matcher instead: no
    /// match creates (under the request id when one is given), one match
    /// updates that resource, and more than one match is an error.
    #[instrument(skip(self, ctx, request), fields(resource_type = %request.resource_type))]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        request: WriteRequest,
    ) -> StorageResult<WriteOutcome> {
        match request.match_criteria.clone() {
            Some(criteria) => self.conditional_update(ctx, request, &criteria).await,
            None => self.update_by_id(ctx, request).await,
        }
    }

    async fn update_by_id(
        &self,
        ctx: &RequestContext,
        request: WriteRequest,
    ) -> StorageResult<WriteOutcome> {
        let resource_type = request.resource_type.as_str();
        let raw_id = request
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                StorageError::invalid_request(format!(
                    "Can not update resource of type {} as it has no ID",
                    resource_type
                ))
            })?;
        let target = self.parse_target(resource_type, raw_id)?;
        self.validate_content(resource_type, &request.content)
            .await?;

        if request.rewrite_history || ctx.rewrite_history_requested() {
            return self.rewrite_history(ctx, &request, &target).await;
        }

        let mut tx = self.provider.begin(ctx).await?;
        let existing = if ctx.upsert_existence_check_disabled() {
            None
        } else {
            self.find_existing(&mut *tx, ctx, resource_type, &target.id)
                .await?
        };

        let outcome = match existing {
            Some(lookup) => {
                self.update_in(&mut *tx, ctx, &request, &lookup, UpdateKind::Update)
                    .await?
            }
            None => {
                if let Some(expected) = request.version {
                    return Err(ConcurrencyError::VersionConflict {
                        resource_type: resource_type.to_string(),
                        id: target.id.clone(),
                        expected_version: expected,
                        actual_version: 0,
                    }
                    .into());
                }
                validate_client_id(
                    self.settings.client_id_strategy,
                    resource_type,
                    &target.id,
                    ctx.is_system_request(),
                )?;
                self.create_in(&mut *tx, ctx, &request, Some(&target.id))
                    .await?
            }
        };
        self.commit(tx).await?;
        self.after_commit(ctx, outcome).await
    }

    /// Deletes a resource by writing a tombstone version.
    ///
    /// Deleting an already deleted resource reports
    /// [`StorageOutcome::DeleteAlreadyDeleted`] and writes nothing.
    #[instrument(skip(self, ctx), fields(resource_type = %resource_type, id = %id))]
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        id: &str,
        expected_version: Option<i64>,
    ) -> StorageResult<WriteOutcome> {
        if !self.settings.delete_enabled {
            return Err(StorageError::invalid_request(
                "Resource deletion is not enabled on this server",
            ));
        }
        let target = self.parse_target(resource_type, id)?;

        let mut tx = self.provider.begin(ctx).await?;
        let lookup = self
            .identities
            .resolve(&mut *tx, ctx.partition(), resource_type, &target.id)
            .await?;
        let public_id = lookup.public_id();
        let current = self.current_record(&mut *tx, &lookup).await?;
        check_expected_version(&current, &public_id, expected_version)?;

        if current.is_deleted() {
            self.commit(tx).await?;
            debug!(resource_type, id = %public_id, "Resource already deleted");
            return Ok(WriteOutcome {
                id: public_id,
                resource_type: resource_type.to_string(),
                version: current.version,
                created: false,
                no_op: true,
                status: StorageOutcome::DeleteAlreadyDeleted,
                resource: Value::Null,
                previous: None,
            });
        }

        let previous = self.previous_snapshot(&mut *tx, &lookup).await?;
        for interceptor in &self.interceptors {
            interceptor
                .pre_commit_deleted(ctx, resource_type, &public_id, previous.as_ref())
                .await?;
        }

        let tags = self.versions.current_tags(&mut *tx, &current).await?;
        let provenance = Provenance::from_request(&Value::Null, ctx, &self.settings);
        let record = self
            .versions
            .persist_version(
                &mut *tx,
                &current,
                &RecordChange::deletion(&current),
                &EncodedResource::deleted(),
                &tags,
                &provenance,
            )
            .await?;
        self.commit(tx).await?;

        let outcome = WriteOutcome {
            id: public_id,
            resource_type: resource_type.to_string(),
            version: record.version,
            created: false,
            no_op: false,
            status: StorageOutcome::Delete,
            resource: Value::Null,
            previous,
        };
        self.after_commit(ctx, outcome).await
    }

    /// Applies a patch to the current version.
    ///
    /// `expected_version`, or a version carried by `id`, must name the current
    /// version.
    #[instrument(skip(self, ctx, patch), fields(resource_type = %resource_type, id = %id))]
    pub async fn patch(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        id: &str,
        patch: &PatchDocument,
        expected_version: Option<i64>,
    ) -> StorageResult<WriteOutcome> {
        let target = self.parse_target(resource_type, id)?;

        let mut tx = self.provider.begin(ctx).await?;
        let lookup = self
            .identities
            .resolve(&mut *tx, ctx.partition(), resource_type, &target.id)
            .await?;
        let stored = self.versions.read(&mut *tx, &lookup, false).await?;
        if let Some(version) = expected_version.or(target.version) {
            if version != stored.version() {
                return Err(ConcurrencyError::StalePatch {
                    resource_type: resource_type.to_string(),
                    id: lookup.public_id(),
                    version,
                }
                .into());
            }
        }

        let patched = patch.apply(stored.content())?;
        self.validate_content(resource_type, &patched).await?;
        let request = WriteRequest::new(resource_type, patched).with_id(lookup.public_id());
        let outcome = self
            .update_in(&mut *tx, ctx, &request, &lookup, UpdateKind::Patch)
            .await?;
        self.commit(tx).await?;
        self.after_commit(ctx, outcome).await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Reads the current version. A `/_history/{v}` suffix reads that version.
    pub async fn read(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<StoredResource> {
        self.read_current(ctx, resource_type, id, false).await
    }

    /// Reads the current version, returning deletion markers instead of
    /// failing with gone.
    pub async fn read_including_deleted(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<StoredResource> {
        self.read_current(ctx, resource_type, id, true).await
    }

    /// Reads one version.
    pub async fn vread(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        id: &str,
        version: i64,
    ) -> StorageResult<StoredResource> {
        let target = ResourceId::parse(id)?;
        let mut tx = self.provider.begin(ctx).await?;
        let lookup = self
            .identities
            .resolve(&mut *tx, ctx.partition(), resource_type, &target.id)
            .await?;
        let stored = self.versions.vread(&mut *tx, &lookup, version).await?;
        self.commit(tx).await?;
        Ok(stored)
    }

    /// Lists every retained version, newest first.
    pub async fn history(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<Vec<StoredResource>> {
        let target = ResourceId::parse(id)?;
        let mut tx = self.provider.begin(ctx).await?;
        let lookup = self
            .identities
            .resolve(&mut *tx, ctx.partition(), resource_type, &target.id)
            .await?;
        let versions = self.versions.history(&mut *tx, &lookup).await?;
        self.commit(tx).await?;
        Ok(versions)
    }

    // ------------------------------------------------------------------
    // Meta operations
    // ------------------------------------------------------------------

    /// Returns the tags, security labels and profiles currently linked to a
    /// resource.
    pub async fn meta_get(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<Vec<TagDefinition>> {
        let target = ResourceId::parse(id)?;
        let mut tx = self.provider.begin(ctx).await?;
        let lookup = self
            .identities
            .resolve(&mut *tx, ctx.partition(), resource_type, &target.id)
            .await?;
        let current = self.current_record(&mut *tx, &lookup).await?;
        let mut tags = self.versions.current_tags(&mut *tx, &current).await?;
        self.commit(tx).await?;
        sort_definitions(&mut tags);
        Ok(tags)
    }

    /// Adds tags to the current version without creating a new one.
    #[instrument(skip(self, ctx, tags), fields(resource_type = %resource_type, id = %id))]
    pub async fn meta_add(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        id: &str,
        tags: &[TagDefinition],
    ) -> StorageResult<Vec<TagDefinition>> {
        let target = ResourceId::parse(id)?;
        let mut tx = self.provider.begin(ctx).await?;
        let lookup = self
            .identities
            .resolve(&mut *tx, ctx.partition(), resource_type, &target.id)
            .await?;
        let current = self.live_record(&mut *tx, &lookup).await?;
        let previous = self.versions.current_tags(&mut *tx, &current).await?;

        let mut merged = previous.clone();
        merged.extend(tags.iter().cloned());
        let merged = dedupe(merged);
        let max = self.settings.max_meta_count;
        if max > 0 && merged.len() > max {
            return Err(ValidationError::TooManyMetaEntries {
                count: merged.len(),
                max,
            }
            .into());
        }

        let mut result = if merged.len() == previous.len() {
            previous
        } else {
            let persisted = self.persistable(&mut *tx, &merged).await?;
            self.versions
                .replace_current_tags(&mut *tx, &current, &persisted, true)
                .await?;
            debug!(added = persisted.len() - previous.len(), "Added meta entries");
            persisted
        };
        self.commit(tx).await?;
        sort_definitions(&mut result);
        Ok(result)
    }

    /// Removes tags from the current version without creating a new one.
    ///
    /// Under the versioned policy only the resource's current links change;
    /// stored history keeps its tags.
    #[instrument(skip(self, ctx, tags), fields(resource_type = %resource_type, id = %id))]
    pub async fn meta_delete(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        id: &str,
        tags: &[TagDefinition],
    ) -> StorageResult<Vec<TagDefinition>> {
        let target = ResourceId::parse(id)?;
        let mut tx = self.provider.begin(ctx).await?;
        let lookup = self
            .identities
            .resolve(&mut *tx, ctx.partition(), resource_type, &target.id)
            .await?;
        let current = self.live_record(&mut *tx, &lookup).await?;
        let previous = self.versions.current_tags(&mut *tx, &current).await?;

        let removed: HashSet<TagKey> = tags.iter().map(TagDefinition::key).collect();
        let remaining: Vec<TagDefinition> = previous
            .iter()
            .filter(|t| !removed.contains(&t.key()))
            .cloned()
            .collect();

        if remaining.len() != previous.len() {
            self.versions
                .replace_current_tags(&mut *tx, &current, &remaining, false)
                .await?;
            debug!(
                removed = previous.len() - remaining.len(),
                "Removed meta entries"
            );
        }
        self.commit(tx).await?;

        let mut remaining = remaining;
        sort_definitions(&mut remaining);
        Ok(remaining)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn create_in(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        request: &WriteRequest,
        client_id: Option<&str>,
    ) -> StorageResult<WriteOutcome> {
        let resource_type = request.resource_type.as_str();
        let content = &request.content;

        if let Some(id) = client_id {
            for interceptor in &self.interceptors {
                interceptor
                    .pre_storage_client_assigned_id(ctx, resource_type, id, content)
                    .await?;
            }
        }
        for interceptor in &self.interceptors {
            interceptor
                .pre_storage_created(ctx, resource_type, content)
                .await?;
        }

        let partition_id = ctx
            .partition()
            .replace_default(&self.settings.partitions)
            .first_partition_id();
        let server_id = match (client_id, self.settings.server_id_strategy) {
            (None, ServerIdStrategy::Uuid) => Some(Uuid::new_v4().to_string()),
            _ => None,
        };
        let external_id = client_id.or(server_id.as_deref());
        let identity = match self
            .identities
            .assign_new(tx, partition_id, resource_type, external_id)
            .await
        {
            Ok(identity) => identity,
            Err(e) if e.is_unique_violation() => {
                return Err(ResourceError::AlreadyExists {
                    resource_type: resource_type.to_string(),
                    id: external_id.unwrap_or_default().to_string(),
                }
                .into());
            }
            Err(e) => return Err(e),
        };

        let kind = self.kinds.get_or_default(resource_type);
        let policy = ReconcilePolicy::for_request(&self.settings, ctx);
        let plan = self
            .tags
            .reconcile(&[], &extract_tags(content, &kind), &policy)?;
        let tags = self.plan_tags(tx, &plan).await?;
        let encoded = self.encode(content)?;
        let provenance = Provenance::from_request(content, ctx, &self.settings);

        let record = self
            .versions
            .persist_create(
                tx,
                &identity,
                &encoded,
                &tags,
                &provenance,
                request.perform_indexing,
            )
            .await?;

        let public_id = identity.public_id();
        let resource = render_resource(
            content.clone(),
            &public_id,
            record.version,
            record.updated_at,
            provenance.meta_source(),
            &tags,
            self.settings.sort_meta_on_read,
        );
        Ok(WriteOutcome {
            id: public_id,
            resource_type: resource_type.to_string(),
            version: record.version,
            created: true,
            no_op: false,
            status: StorageOutcome::Create,
            resource,
            previous: None,
        })
    }

    async fn update_in(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        request: &WriteRequest,
        lookup: &ResourceLookup,
        update_kind: UpdateKind,
    ) -> StorageResult<WriteOutcome> {
        let resource_type = request.resource_type.as_str();
        let public_id = lookup.public_id();
        let current = self.current_record(tx, lookup).await?;
        if current.resource_type != resource_type {
            return Err(ValidationError::TypeMismatch {
                resource_type: current.resource_type.clone(),
                id: public_id,
                incoming_type: resource_type.to_string(),
            }
            .into());
        }
        check_expected_version(&current, &public_id, request.version)?;

        let kind = self.kinds.get_or_default(resource_type);
        let policy = ReconcilePolicy::for_request(&self.settings, ctx);
        let previous_tags = self.versions.current_tags(tx, &current).await?;
        let plan =
            self.tags
                .reconcile(&previous_tags, &extract_tags(&request.content, &kind), &policy)?;
        let tags = self.plan_tags(tx, &plan).await?;
        let encoded = self.encode(&request.content)?;
        let history_present = self.versions.has_current_history(tx, &current).await?;
        let change = RecordChange::detect(
            &current,
            &encoded,
            plan.changed,
            ChangeFlags {
                perform_indexing: request.perform_indexing,
                force: request.force_update,
            },
            history_present,
        );

        let (changed_status, unchanged_status) = update_kind.statuses();
        if !change.changed {
            let stored = self.versions.read(tx, lookup, false).await?;
            debug!(
                resource_type,
                id = %public_id,
                version = current.version,
                "Write carries no change"
            );
            return Ok(WriteOutcome {
                id: public_id,
                resource_type: resource_type.to_string(),
                version: current.version,
                created: false,
                no_op: true,
                status: unchanged_status,
                resource: stored.into_content(),
                previous: None,
            });
        }

        let previous = if current.is_deleted() {
            None
        } else {
            self.previous_snapshot(tx, lookup).await?
        };
        let provenance = Provenance::from_request(&request.content, ctx, &self.settings);
        let record = self
            .versions
            .persist_version(tx, &current, &change, &encoded, &tags, &provenance)
            .await?;
        let resource = render_resource(
            request.content.clone(),
            &public_id,
            record.version,
            record.updated_at,
            provenance.meta_source(),
            &tags,
            self.settings.sort_meta_on_read,
        );

        for interceptor in &self.interceptors {
            interceptor
                .pre_commit_updated(ctx, resource_type, previous.as_ref(), &resource)
                .await?;
        }

        Ok(WriteOutcome {
            id: public_id,
            resource_type: resource_type.to_string(),
            version: record.version,
            created: change.resurrected,
            no_op: false,
            status: changed_status,
            resource,
            previous,
        })
    }

    async fn rewrite_history(
        &self,
        ctx: &RequestContext,
        request: &WriteRequest,
        target: &ResourceId,
    ) -> StorageResult<WriteOutcome> {
        if !self.settings.allow_history_rewrite {
            return Err(StorageError::invalid_request(
                "History rewrite is not enabled on this server",
            ));
        }
        let version = target.version.ok_or_else(|| {
            StorageError::invalid_request("Invalid resource ID, ID must contain a history version")
        })?;
        let resource_type = request.resource_type.as_str();

        let mut tx = self.provider.begin(ctx).await?;
        let lookup = self
            .identities
            .resolve(&mut *tx, ctx.partition(), resource_type, &target.id)
            .await?;
        let public_id = lookup.public_id();
        let current = self.current_record(&mut *tx, &lookup).await?;

        let kind = self.kinds.get_or_default(resource_type);
        let policy = ReconcilePolicy::for_request(&self.settings, ctx);
        let previous_tags = self.versions.current_tags(&mut *tx, &current).await?;
        let plan =
            self.tags
                .reconcile(&previous_tags, &extract_tags(&request.content, &kind), &policy)?;
        let tags = self.plan_tags(&mut *tx, &plan).await?;
        let encoded = self.encode(&request.content)?;
        let provenance = Provenance::from_request(&request.content, ctx, &self.settings);

        let result = self
            .versions
            .rewrite(
                &mut *tx,
                &current,
                &public_id,
                version,
                &encoded,
                &tags,
                &provenance,
            )
            .await?;
        let stored = self.versions.vread(&mut *tx, &lookup, version).await?;
        let rewritten = result == RewriteResult::Rewritten;
        if rewritten {
            for interceptor in &self.interceptors {
                interceptor
                    .pre_commit_updated(ctx, resource_type, None, stored.content())
                    .await?;
            }
        }
        self.commit(tx).await?;

        let outcome = WriteOutcome {
            id: public_id,
            resource_type: resource_type.to_string(),
            version,
            created: false,
            no_op: !rewritten,
            status: StorageOutcome::HistoryRewrite,
            resource: stored.into_content(),
            previous: None,
        };
        self.after_commit(ctx, outcome).await
    }

    async fn conditional_update(
        &self,
        ctx: &RequestContext,
        mut request: WriteRequest,
        criteria: &str,
    ) -> StorageResult<WriteOutcome> {
        let resource_type = request.resource_type.clone();
        let requested = match request.id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(self.parse_target(&resource_type, raw)?),
            _ => None,
        };
        self.validate_content(&resource_type, &request.content)
            .await?;

        let matched = self
            .single_match(ctx, &resource_type, criteria, "update")
            .await?;
        request.match_criteria = None;
        let Some(surrogate_id) = matched else {
            debug!(resource_type = %resource_type, "Conditional update matched nothing");
            return match requested {
                Some(_) => self.update_by_id(ctx, request).await,
                None => self.create(ctx, request).await,
            };
        };

        let mut tx = self.provider.begin(ctx).await?;
        let lookup = tx
            .find_identities_by_surrogate(&[surrogate_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::not_found(&resource_type, surrogate_id.to_string()))?;
        if let Some(target) = &requested {
            if target.id != lookup.public_id() {
                return Err(StorageError::invalid_request(format!(
                    "Failed to process conditional update. The supplied resource ID[{}] does not match the conditional URL",
                    target.id
                )));
            }
        }
        let outcome = self
            .update_in(&mut *tx, ctx, &request, &lookup, UpdateKind::Update)
            .await?;
        self.commit(tx).await?;
        self.after_commit(ctx, outcome).await
    }

    /// Runs the matcher. Returns the single match, or `None` when nothing
    /// matched.
    async fn single_match(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        criteria: &str,
        operation: &str,
    ) -> StorageResult<Option<i64>> {
        let matcher = self.matcher.as_ref().ok_or_else(|| {
            StorageError::invalid_request(format!(
                "Conditional {} requires a configured matcher",
                operation
            ))
        })?;
        let matches = matcher.find_matches(ctx, resource_type, criteria).await?;
        match matches.as_slice() {
            [] => Ok(None),
            [surrogate_id] => Ok(Some(*surrogate_id)),
            _ => Err(TransactionError::MultipleMatches {
                operation: operation.to_string(),
                count: matches.len(),
            }
            .into()),
        }
    }

    async fn conditional_match(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        surrogate_id: i64,
    ) -> StorageResult<WriteOutcome> {
        let mut tx = self.provider.begin(ctx).await?;
        let lookup = tx
            .find_identities_by_surrogate(&[surrogate_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::not_found(resource_type, surrogate_id.to_string()))?;
        let stored = self.versions.read(&mut *tx, &lookup, false).await?;
        self.commit(tx).await?;

        debug!(resource_type, id = %stored.id(), "Conditional create matched an existing resource");
        Ok(WriteOutcome {
            id: stored.id().to_string(),
            resource_type: resource_type.to_string(),
            version: stored.version(),
            created: false,
            no_op: true,
            status: StorageOutcome::CreateConditionalMatch,
            resource: stored.into_content(),
            previous: None,
        })
    }

    async fn read_current(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        id: &str,
        allow_deleted: bool,
    ) -> StorageResult<StoredResource> {
        let target = ResourceId::parse(id)?;
        let mut tx = self.provider.begin(ctx).await?;
        let lookup = self
            .identities
            .resolve(&mut *tx, ctx.partition(), resource_type, &target.id)
            .await?;
        let stored = match target.version {
            Some(version) => self.versions.vread(&mut *tx, &lookup, version).await?,
            None => self.versions.read(&mut *tx, &lookup, allow_deleted).await?,
        };
        self.commit(tx).await?;
        Ok(stored)
    }

    /// Runs the checks every incoming body must pass.
    async fn validate_content(&self, resource_type: &str, content: &Value) -> StorageResult<()> {
        validate_resource_type(resource_type, content)?;
        reject_subsetted(content)?;
        if let Some(validator) = &self.validator {
            let kind = self.kinds.get_or_default(resource_type);
            check_findings(resource_type, validator.validate(&kind, content).await)?;
        }
        Ok(())
    }

    fn parse_target(&self, resource_type: &str, raw: &str) -> StorageResult<ResourceId> {
        let target = ResourceId::parse(raw)?;
        if let Some(prefix) = target.resource_type.as_deref() {
            if prefix != resource_type {
                return Err(StorageError::invalid_request(format!(
                    "Resource ID type [{}] does not match resource type [{}]",
                    prefix, resource_type
                )));
            }
        }
        if target.is_blank() {
            return Err(StorageError::invalid_request(format!(
                "Can not update resource of type {} as it has no ID",
                resource_type
            )));
        }
        validate_id_syntax(&target.id)?;
        Ok(target)
    }

    /// Resolves an update target, returning `None` when it does not exist.
    async fn find_existing(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<Option<ResourceLookup>> {
        match self
            .identities
            .resolve(tx, ctx.partition(), resource_type, id)
            .await
        {
            Ok(lookup) => Ok(Some(lookup)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.reject_foreign_surrogate(tx, resource_type, id).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// A numeric id naming a resource of another type cannot be reused.
    async fn reject_foreign_surrogate(
        &self,
        tx: &mut dyn Transaction,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<()> {
        if self.settings.client_id_strategy == ClientIdStrategy::Any || !is_numeric_id(id) {
            return Ok(());
        }
        let Ok(surrogate_id) = id.parse::<i64>() else {
            return Ok(());
        };
        let foreign = tx
            .find_identities_by_surrogate(&[surrogate_id])
            .await?
            .into_iter()
            .find(|l| l.external_id.is_none() && l.resource_type != resource_type);
        match foreign {
            Some(lookup) => Err(ValidationError::TypeMismatch {
                resource_type: lookup.resource_type,
                id: id.to_string(),
                incoming_type: resource_type.to_string(),
            }
            .into()),
            None => Ok(()),
        }
    }

    async fn current_record(
        &self,
        tx: &mut dyn Transaction,
        lookup: &ResourceLookup,
    ) -> StorageResult<ResourceRecord> {
        tx.read_record(lookup.surrogate_id)
            .await?
            .ok_or_else(|| StorageError::not_found(&lookup.resource_type, lookup.public_id()))
    }

    async fn live_record(
        &self,
        tx: &mut dyn Transaction,
        lookup: &ResourceLookup,
    ) -> StorageResult<ResourceRecord> {
        let record = self.current_record(tx, lookup).await?;
        if record.is_deleted() {
            return Err(ResourceError::Gone {
                resource_type: lookup.resource_type.clone(),
                id: lookup.public_id(),
                deleted_at: record.deleted_at,
            }
            .into());
        }
        Ok(record)
    }

    /// The rendered current version, staged for interceptors.
    async fn previous_snapshot(
        &self,
        tx: &mut dyn Transaction,
        lookup: &ResourceLookup,
    ) -> StorageResult<Option<Value>> {
        if self.settings.mass_ingestion_mode {
            return Ok(None);
        }
        match self.versions.read(tx, lookup, false).await {
            Ok(stored) => Ok(Some(stored.into_content())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn plan_tags(
        &self,
        tx: &mut dyn Transaction,
        plan: &TagPlan,
    ) -> StorageResult<Vec<TagDefinition>> {
        self.persistable(tx, &plan.links).await
    }

    /// Resolves tag definitions when the storage mode links them.
    async fn persistable(
        &self,
        tx: &mut dyn Transaction,
        tags: &[TagDefinition],
    ) -> StorageResult<Vec<TagDefinition>> {
        if self.settings.tag_storage_mode.uses_links() {
            self.tags.resolve_definitions(tx, tags).await
        } else {
            Ok(tags.to_vec())
        }
    }

    fn encode(&self, content: &Value) -> StorageResult<EncodedResource> {
        let excluded = codec::excluded_paths(content);
        codec::encode(
            content,
            self.settings.resource_encoding,
            &excluded,
            self.settings.inline_resource_text_below_size,
        )
    }

    /// Commits, then publishes the identities the transaction staged.
    async fn commit(&self, mut tx: Box<dyn Transaction>) -> StorageResult<()> {
        let staged = tx.take_staged_identities();
        tx.commit().await?;
        self.identities.publish(staged);
        Ok(())
    }

    async fn after_commit(
        &self,
        ctx: &RequestContext,
        outcome: WriteOutcome,
    ) -> StorageResult<WriteOutcome> {
        if outcome.no_op {
            debug!(status = %outcome.status, reference = %outcome.versioned_reference(), "No-op write");
            return Ok(outcome);
        }
        info!(
            status = %outcome.status,
            reference = %outcome.versioned_reference(),
            created = outcome.created,
            "Write committed"
        );
        for interceptor in &self.interceptors {
            interceptor.post_commit(ctx, &outcome).await?;
        }
        Ok(outcome)
    }
}

fn check_expected_version(
    current: &ResourceRecord,
    public_id: &str,
    expected: Option<i64>,
) -> StorageResult<()> {
    match expected {
        Some(expected) if expected != current.version => Err(ConcurrencyError::VersionConflict {
            resource_type: current.resource_type.clone(),
            id: public_id.to_string(),
            expected_version: expected,
            actual_version: current.version,
        }
        .into()),
        _ => Ok(()),
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::backends::sqlite::SqliteBackend;
    use crate::config::TagStorageMode;
    use serde_json::json;

    fn create_test_engine(settings: StorageSettings) -> ResourceEngine {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        ResourceEngine::builder()
            .with_provider(Arc::new(backend))
            .with_settings(settings)
            .build()
            .unwrap()
    }

    fn widget(color: &str) -> Value {
        json!({"resourceType": "Widget", "color": color})
    }

    #[test]
    fn test_update_kind_statuses() {
        assert_eq!(
            UpdateKind::Patch.statuses(),
            (StorageOutcome::Patch, StorageOutcome::PatchNoChange)
        );
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let engine = create_test_engine(StorageSettings::default());
        let ctx = RequestContext::default();
        let created = engine
            .create(&ctx, WriteRequest::new("Widget", widget("blue")))
            .await
            .unwrap();
        assert!(created.created);
        assert_eq!(created.version, 1);
        assert_eq!(created.resource["meta"]["versionId"], "1");

        let read = engine.read(&ctx, "Widget", &created.id).await.unwrap();
        assert_eq!(read.content()["color"], "blue");
        assert_eq!(read.version(), 1);
    }

    #[tokio::test]
    async fn test_update_no_change_then_change() {
        let engine = create_test_engine(StorageSettings::default());
        let ctx = RequestContext::default();
        let request = WriteRequest::new("Widget", widget("blue")).with_id("w1");
        let first = engine.update(&ctx, request.clone()).await.unwrap();
        assert_eq!(first.status, StorageOutcome::Create);

        let same = engine.update(&ctx, request).await.unwrap();
        assert_eq!(same.status, StorageOutcome::UpdateNoChange);
        assert_eq!(same.version, 1);

        let changed = engine
            .update(&ctx, WriteRequest::new("Widget", widget("red")).with_id("w1"))
            .await
            .unwrap();
        assert_eq!(changed.version, 2);
        assert_eq!(changed.previous.unwrap()["color"], "blue");
    }

    #[tokio::test]
    async fn test_delete_and_recreate() {
        let engine = create_test_engine(StorageSettings::default());
        let ctx = RequestContext::default();
        engine
            .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
            .await
            .unwrap();

        let deleted = engine.delete(&ctx, "Widget", "w1", None).await.unwrap();
        assert_eq!(deleted.version, 2);
        let again = engine.delete(&ctx, "Widget", "w1", None).await.unwrap();
        assert_eq!(again.status, StorageOutcome::DeleteAlreadyDeleted);

        let err = engine.read(&ctx, "Widget", "w1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Gone);

        let recreated = engine
            .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
            .await
            .unwrap();
        assert!(recreated.created);
        assert_eq!(recreated.version, 3);
    }

    #[tokio::test]
    async fn test_meta_operations_inline() {
        let engine =
            create_test_engine(StorageSettings::default().with_tag_storage_mode(TagStorageMode::Inline));
        let ctx = RequestContext::default();
        engine
            .update(&ctx, WriteRequest::new("Widget", widget("blue")).with_id("w1"))
            .await
            .unwrap();

        let added = engine
            .meta_add(&ctx, "Widget", "w1", &[TagDefinition::tag("http://t", "a")])
            .await
            .unwrap();
        assert_eq!(added.len(), 1);
        let read = engine.read(&ctx, "Widget", "w1").await.unwrap();
        assert_eq!(read.version(), 1);
        assert_eq!(read.content()["meta"]["tag"][0]["code"], "a");

        let remaining = engine
            .meta_delete(&ctx, "Widget", "w1", &[TagDefinition::tag("http://t", "a")])
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }
}
