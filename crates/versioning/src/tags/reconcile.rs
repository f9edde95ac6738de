//! Tag set reconciliation.
//!
//! [`reconcile`] is a pure function: given the previously persisted tag set and
//! the set carried by the incoming resource, it computes the set to persist,
//! the tags that must be echoed back onto the outgoing resource, and whether
//! anything changed.

use std::collections::{BTreeSet, HashSet};

use crate::config::{StorageSettings, TagStorageMode};
use crate::error::{StorageResult, ValidationError};
use crate::partition::RequestContext;

use super::definition::{TagDefinition, TagKey, TagType, dedupe};

/// Inputs steering a single reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// Deployment tag storage mode.
    pub mode: TagStorageMode,
    /// Tag types whose previous entries are dropped when absent from the
    /// incoming set.
    pub snapshot_types: BTreeSet<TagType>,
    /// Systems whose previous entries are always dropped.
    pub always_drop_systems: Vec<String>,
    /// Hard cap on the resulting set. `0` disables it.
    pub max_meta_count: usize,
}

impl ReconcilePolicy {
    /// Builds the policy for a request. A snapshot mode header on the request
    /// overrides the configured default.
    pub fn for_request(settings: &StorageSettings, ctx: &RequestContext) -> Self {
        Self {
            mode: settings.tag_storage_mode,
            snapshot_types: ctx
                .tag_snapshot_modes()
                .unwrap_or_else(|| settings.default_tag_snapshot_modes.clone()),
            always_drop_systems: settings.always_drop_tag_systems.clone(),
            max_meta_count: settings.max_meta_count,
        }
    }

    fn always_drops(&self, tag: &TagDefinition) -> bool {
        tag.system
            .as_deref()
            .is_some_and(|s| self.always_drop_systems.iter().any(|d| d == s))
    }
}

/// The outcome of reconciling a tag set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagPlan {
    /// The tag set to persist.
    pub links: Vec<TagDefinition>,
    /// Previously persisted tags retained by the merge, to be reflected onto the
    /// outgoing resource.
    pub echo: Vec<TagDefinition>,
    /// Whether the persisted set differs from the previous one.
    pub changed: bool,
}

/// Reconciles a previous tag set with an incoming one.
pub fn reconcile(
    previous: &[TagDefinition],
    incoming: &[TagDefinition],
    policy: &ReconcilePolicy,
) -> StorageResult<TagPlan> {
    let mut links = dedupe(incoming.to_vec());
    let mut echo = Vec::new();

    if policy.mode != TagStorageMode::Inline {
        let mut present: HashSet<TagKey> = links.iter().map(TagDefinition::key).collect();
        for tag in previous {
            if policy.always_drops(tag) {
                continue;
            }
            let key = tag.key();
            if present.contains(&key) || policy.snapshot_types.contains(&tag.tag_type) {
                continue;
            }
            present.insert(key);
            links.push(tag.clone());
            echo.push(tag.clone());
        }
    }

    if policy.max_meta_count > 0 && links.len() > policy.max_meta_count {
        return Err(ValidationError::TooManyMetaEntries {
            count: links.len(),
            max: policy.max_meta_count,
        }
        .into());
    }

    let before: HashSet<TagKey> = previous.iter().map(TagDefinition::key).collect();
    let after: HashSet<TagKey> = links.iter().map(TagDefinition::key).collect();
    let changed = before != after;

    Ok(TagPlan {
        links,
        echo,
        changed,
    })
}
