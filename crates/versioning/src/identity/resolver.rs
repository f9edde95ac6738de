//! Identity resolution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::config::{ClientIdStrategy, StorageSettings};
use crate::core::Transaction;
use crate::error::{ErrorKind, IdentityError, StorageError, StorageResult};
use crate::partition::{PartitionFilter, RequestPartitionId};
use crate::types::ResourceLookup;

use super::cache::{CachedIdentity, IdentityCache, StagedIdentity};

/// Message used when a reference carries no id.
pub const MISSING_PARAMETER_VALUE: &str = "Parameter value missing in request";

/// The identity resolution collaborator of the engine.
///
/// Every method runs inside the caller's transaction. Cache entries learned
/// inside it are staged on the transaction with
/// [`Transaction::stage_identity`] and handed to [`IdentityResolution::publish`]
/// after commit.
#[async_trait]
pub trait IdentityResolution: Send + Sync {
    /// Resolves one id within the visible partitions.
    ///
    /// A `Type/` prefix is stripped. Fails with not-found when the id is
    /// unmapped, and with a non-unique identity error when more than one
    /// identity matches.
    async fn resolve(
        &self,
        tx: &mut dyn Transaction,
        partition: &RequestPartitionId,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<ResourceLookup>;

    /// Resolves many ids of one type. Fails entirely if any id is unresolved.
    async fn resolve_batch(
        &self,
        tx: &mut dyn Transaction,
        partition: &RequestPartitionId,
        resource_type: &str,
        ids: &[String],
    ) -> StorageResult<HashMap<String, i64>>;

    /// Best-effort resolution of `(type, id)` references, consulting the cache
    /// first. Unresolved references are skipped; results keep input order.
    ///
    /// With `only_explicit`, numeric ids that would resolve by parsing are
    /// skipped instead.
    async fn resolve_with_cache(
        &self,
        tx: &mut dyn Transaction,
        partition: &RequestPartitionId,
        references: &[(String, String)],
        only_explicit: bool,
    ) -> StorageResult<Vec<i64>>;

    /// Allocates a new identity in `partition_id`.
    async fn assign_new(
        &self,
        tx: &mut dyn Transaction,
        partition_id: Option<i32>,
        resource_type: &str,
        external_id: Option<&str>,
    ) -> StorageResult<ResourceLookup>;

    /// Resolves an id, assigning a new identity when it is unmapped.
    ///
    /// Returns the identity and whether it was newly assigned.
    async fn resolve_or_assign(
        &self,
        tx: &mut dyn Transaction,
        partition: &RequestPartitionId,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<(ResourceLookup, bool)>;

    /// Maps surrogate ids to public ids.
    async fn translate_surrogates(
        &self,
        tx: &mut dyn Transaction,
        surrogate_ids: &[i64],
    ) -> StorageResult<HashMap<i64, String>>;

    /// Makes identities staged by a committed transaction visible to later
    /// lookups. Must only be called after the commit succeeded.
    fn publish(&self, _staged: Vec<StagedIdentity>) {}
}

/// Default [`IdentityResolution`] implementation backed by an [`IdentityCache`].
#[derive(Debug)]
pub struct IdentityResolver {
    settings: Arc<StorageSettings>,
    cache: IdentityCache,
}

impl IdentityResolver {
    /// Creates a resolver with its own cache.
    pub fn new(settings: Arc<StorageSettings>) -> Self {
        let cache = IdentityCache::new(settings.identity_cache_max_entries);
        Self { settings, cache }
    }

    /// Returns the identity cache.
    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Returns `true` if `id` can only be resolved through an explicit
    /// external id record.
    pub fn requires_explicit(&self, id: &str) -> bool {
        self.settings.client_id_strategy == ClientIdStrategy::Any || !is_numeric_id(id)
    }

    fn filter(&self, partition: &RequestPartitionId) -> PartitionFilter {
        PartitionFilter::for_request(partition, &self.settings.partitions)
    }

    fn cache_scope(&self, partition: &RequestPartitionId) -> RequestPartitionId {
        partition.replace_default(&self.settings.partitions)
    }

    /// Looks up identities by explicit external id, in chunks.
    async fn find_explicit(
        &self,
        tx: &mut dyn Transaction,
        filter: &PartitionFilter,
        resource_type: &str,
        ids: &[String],
    ) -> StorageResult<Vec<ResourceLookup>> {
        let mut found = Vec::new();
        for chunk in ids.chunks(self.settings.max_in_list_size.max(1)) {
            found.extend(tx.find_identities(filter, resource_type, chunk).await?);
        }
        Ok(found)
    }

    /// Looks up identities by numeric id, enforcing type, partition and the
    /// numeric alias rule.
    async fn find_numeric(
        &self,
        tx: &mut dyn Transaction,
        filter: &PartitionFilter,
        resource_type: &str,
        ids: &[i64],
    ) -> StorageResult<Vec<ResourceLookup>> {
        let mut found = Vec::new();
        for chunk in ids.chunks(self.settings.max_in_list_size.max(1)) {
            found.extend(
                tx.find_identities_by_surrogate(chunk)
                    .await?
                    .into_iter()
                    .filter(|l| l.resource_type == resource_type)
                    .filter(|l| filter.matches(l.partition_id))
                    // A resource with an explicit id is not reachable by its surrogate
                    .filter(|l| l.external_id.is_none()),
            );
        }
        Ok(found)
    }
}

/// Returns `true` if `id` consists only of ASCII digits.
pub fn is_numeric_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

/// Removes a leading `Type/` from an id.
pub fn strip_type_prefix<'a>(resource_type: &str, id: &'a str) -> &'a str {
    id.strip_prefix(resource_type)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(id)
}

#[async_trait]
impl IdentityResolution for IdentityResolver {
    async fn resolve(
        &self,
        tx: &mut dyn Transaction,
        partition: &RequestPartitionId,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<ResourceLookup> {
        let id = strip_type_prefix(resource_type, id.trim());
        if id.is_empty() {
            return Err(StorageError::invalid_request(MISSING_PARAMETER_VALUE));
        }

        let scope = self.cache_scope(partition);
        let filter = self.filter(partition);
        if filter.is_single_partition() {
            if let Some(cached) = self.cache.get(&scope, resource_type, id) {
                let mut lookup = cached.to_lookup();
                lookup.deleted_at = tx
                    .read_record(lookup.surrogate_id)
                    .await?
                    .and_then(|record| record.deleted_at);
                trace!(resource_type, id, surrogate_id = lookup.surrogate_id, "Identity cache hit");
                return Ok(lookup);
            }
        }

        let mut found = if self.requires_explicit(id) {
            self.find_explicit(tx, &filter, resource_type, &[id.to_string()])
                .await?
        } else {
            let surrogate_id = id
                .parse::<i64>()
                .map_err(|_| StorageError::not_found(resource_type, id))?;
            self.find_numeric(tx, &filter, resource_type, &[surrogate_id])
                .await?
        };

        match found.len() {
            0 => {
                trace!(resource_type, id, partition = %partition, "Identity not found");
                Err(StorageError::not_found(resource_type, id))
            }
            1 => {
                let lookup = found.remove(0);
                stage_forward(tx, &scope, resource_type, id, &lookup);
                Ok(lookup)
            }
            _ => Err(IdentityError::NonUnique {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            }
            .into()),
        }
    }

    async fn resolve_batch(
        &self,
        tx: &mut dyn Transaction,
        partition: &RequestPartitionId,
        resource_type: &str,
        ids: &[String],
    ) -> StorageResult<HashMap<String, i64>> {
        if ids.is_empty() {
            return Err(StorageError::invalid_request(
                "At least one id is required for batch resolution",
            ));
        }

        let scope = self.cache_scope(partition);
        let filter = self.filter(partition);
        let cache_readable = filter.is_single_partition();
        let mut resolved: HashMap<String, i64> = HashMap::with_capacity(ids.len());
        let mut queued = HashSet::new();
        let mut explicit = Vec::new();
        let mut numeric: HashMap<i64, String> = HashMap::new();

        for raw in ids {
            let id = strip_type_prefix(resource_type, raw.trim());
            if id.is_empty() {
                return Err(StorageError::invalid_request(MISSING_PARAMETER_VALUE));
            }
            if !queued.insert(id.to_string()) {
                continue;
            }
            if cache_readable {
                if let Some(cached) = self.cache.get(&scope, resource_type, id) {
                    resolved.insert(id.to_string(), cached.surrogate_id);
                    continue;
                }
            }
            if self.requires_explicit(id) {
                explicit.push(id.to_string());
            } else if let Ok(surrogate_id) = id.parse::<i64>() {
                numeric.insert(surrogate_id, id.to_string());
            }
        }

        // Every id is queried once, so a repeated id in the results is a
        // second identity under the same key
        let mut seen = HashSet::new();
        for lookup in self
            .find_explicit(tx, &filter, resource_type, &explicit)
            .await?
        {
            let id = lookup.public_id();
            if !seen.insert(id.clone()) {
                return Err(IdentityError::NonUnique {
                    resource_type: resource_type.to_string(),
                    id,
                }
                .into());
            }
            stage_forward(tx, &scope, resource_type, &id, &lookup);
            resolved.insert(id, lookup.surrogate_id);
        }

        let surrogates: Vec<i64> = numeric.keys().copied().collect();
        for lookup in self
            .find_numeric(tx, &filter, resource_type, &surrogates)
            .await?
        {
            if let Some(id) = numeric.get(&lookup.surrogate_id) {
                stage_forward(tx, &scope, resource_type, id, &lookup);
                resolved.insert(id.clone(), lookup.surrogate_id);
            }
        }

        for raw in ids {
            let id = strip_type_prefix(resource_type, raw.trim());
            if !resolved.contains_key(id) {
                return Err(StorageError::not_found(resource_type, id));
            }
        }

        debug!(resource_type, count = resolved.len(), "Resolved identity batch");
        Ok(resolved)
    }

    async fn resolve_with_cache(
        &self,
        tx: &mut dyn Transaction,
        partition: &RequestPartitionId,
        references: &[(String, String)],
        only_explicit: bool,
    ) -> StorageResult<Vec<i64>> {
        let scope = self.cache_scope(partition);
        let filter = self.filter(partition);
        let mut results: Vec<Option<i64>> = vec![None; references.len()];
        let mut pending: HashMap<String, Vec<(usize, String)>> = HashMap::new();

        for (index, (resource_type, raw)) in references.iter().enumerate() {
            let id = strip_type_prefix(resource_type, raw.trim());
            if id.is_empty() {
                return Err(StorageError::invalid_request(MISSING_PARAMETER_VALUE));
            }
            if !self.requires_explicit(id) {
                if !only_explicit {
                    results[index] = id.parse::<i64>().ok();
                }
                continue;
            }
            if let Some(cached) = self.cache.get(&scope, resource_type, id) {
                results[index] = Some(cached.surrogate_id);
                continue;
            }
            pending
                .entry(resource_type.clone())
                .or_default()
                .push((index, id.to_string()));
        }

        for (resource_type, items) in pending {
            let mut ids: Vec<String> = items.iter().map(|(_, id)| id.clone()).collect();
            ids.sort();
            ids.dedup();
            let found = self.find_explicit(tx, &filter, &resource_type, &ids).await?;
            let mut by_id = HashMap::with_capacity(found.len());
            for lookup in found {
                let id = lookup.public_id();
                stage_forward(tx, &scope, &resource_type, &id, &lookup);
                by_id.insert(id, lookup.surrogate_id);
            }
            for (index, id) in items {
                results[index] = by_id.get(&id).copied();
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn assign_new(
        &self,
        tx: &mut dyn Transaction,
        partition_id: Option<i32>,
        resource_type: &str,
        external_id: Option<&str>,
    ) -> StorageResult<ResourceLookup> {
        let any_policy = self.settings.client_id_strategy == ClientIdStrategy::Any;

        let lookup = match external_id {
            Some(id) if self.requires_explicit(id) => {
                let surrogate_id = tx
                    .insert_identity(partition_id, resource_type, Some(id))
                    .await?;
                ResourceLookup {
                    surrogate_id,
                    resource_type: resource_type.to_string(),
                    external_id: Some(id.to_string()),
                    partition_id,
                    deleted_at: None,
                }
            }
            Some(id) => {
                return Err(StorageError::invalid_request(format!(
                    "Can not create resource with ID[{}], a numeric ID is not allowed",
                    id
                )));
            }
            None => {
                let surrogate_id = tx.insert_identity(partition_id, resource_type, None).await?;
                // Under the permissive policy every public id must be explicit
                let external_id = if any_policy {
                    let id = surrogate_id.to_string();
                    tx.assign_external_id(surrogate_id, &id).await?;
                    Some(id)
                } else {
                    None
                };
                ResourceLookup {
                    surrogate_id,
                    resource_type: resource_type.to_string(),
                    external_id,
                    partition_id,
                    deleted_at: None,
                }
            }
        };

        stage_forward(
            tx,
            &RequestPartitionId::from_partition_ids([partition_id]),
            resource_type,
            &lookup.public_id(),
            &lookup,
        );
        debug!(
            resource_type,
            id = %lookup.public_id(),
            surrogate_id = lookup.surrogate_id,
            partition_id = ?partition_id,
            "Assigned new identity"
        );
        Ok(lookup)
    }

    async fn resolve_or_assign(
        &self,
        tx: &mut dyn Transaction,
        partition: &RequestPartitionId,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<(ResourceLookup, bool)> {
        match self.resolve(tx, partition, resource_type, id).await {
            Ok(lookup) => return Ok((lookup, false)),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let partition_id = self.cache_scope(partition).first_partition_id();
        let id = strip_type_prefix(resource_type, id.trim());
        match self.assign_new(tx, partition_id, resource_type, Some(id)).await {
            Ok(lookup) => Ok((lookup, true)),
            Err(e) if e.is_unique_violation() => {
                debug!(resource_type, id, "Identity assigned concurrently, re-resolving");
                let lookup = self.resolve(tx, partition, resource_type, id).await?;
                Ok((lookup, false))
            }
            Err(e) => Err(e),
        }
    }

    async fn translate_surrogates(
        &self,
        tx: &mut dyn Transaction,
        surrogate_ids: &[i64],
    ) -> StorageResult<HashMap<i64, String>> {
        let mut translated = HashMap::with_capacity(surrogate_ids.len());
        let mut pending = Vec::new();
        for &surrogate_id in surrogate_ids {
            match self.cache.get_public_id(surrogate_id) {
                Some(public_id) => {
                    translated.insert(surrogate_id, public_id);
                }
                None => pending.push(surrogate_id),
            }
        }

        for chunk in pending.chunks(self.settings.max_in_list_size.max(1)) {
            for lookup in tx.find_identities_by_surrogate(chunk).await? {
                let public_id = lookup.public_id();
                tx.stage_identity(StagedIdentity::Reverse {
                    surrogate_id: lookup.surrogate_id,
                    public_id: public_id.clone(),
                });
                translated.insert(lookup.surrogate_id, public_id);
            }
        }

        for surrogate_id in pending {
            translated
                .entry(surrogate_id)
                .or_insert_with(|| surrogate_id.to_string());
        }
        Ok(translated)
    }

    fn publish(&self, staged: Vec<StagedIdentity>) {
        if !staged.is_empty() {
            trace!(count = staged.len(), "Publishing committed identities");
            self.cache.publish(staged);
        }
    }
}

/// Stages a forward cache entry on the transaction.
fn stage_forward(
    tx: &mut dyn Transaction,
    scope: &RequestPartitionId,
    resource_type: &str,
    id: &str,
    lookup: &ResourceLookup,
) {
    tx.stage_identity(StagedIdentity::Forward {
        scope: scope.clone(),
        resource_type: resource_type.to_string(),
        id: id.to_string(),
        identity: CachedIdentity::from(lookup),
    });
}
