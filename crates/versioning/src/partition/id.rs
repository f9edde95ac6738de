//! Partition scope types.
//!
//! A [`RequestPartitionId`] describes which partitions a request may see. The
//! default partition is represented by `None` inside a partition list.
//! [`PartitionFilter`] is the normalized predicate derived from a request scope
//! and the deployment's [`PartitionSettings`], ready to be applied to stored
//! identity rows.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PartitionSettings;

/// The partitions visible to a single request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPartitionId {
    /// Every partition is visible.
    AllPartitions,
    /// Only the listed partitions are visible. `None` is the default partition.
    Partitions(Vec<Option<i32>>),
}

impl RequestPartitionId {
    /// A scope covering every partition.
    pub fn all_partitions() -> Self {
        RequestPartitionId::AllPartitions
    }

    /// A scope covering only the default partition.
    pub fn default_partition() -> Self {
        RequestPartitionId::Partitions(vec![None])
    }

    /// A scope covering a single numbered partition.
    pub fn from_partition_id(id: i32) -> Self {
        RequestPartitionId::Partitions(vec![Some(id)])
    }

    /// A scope covering the given partitions.
    pub fn from_partition_ids(ids: impl IntoIterator<Item = Option<i32>>) -> Self {
        RequestPartitionId::Partitions(ids.into_iter().collect())
    }

    /// Returns `true` if every partition is visible.
    pub fn is_all_partitions(&self) -> bool {
        matches!(self, RequestPartitionId::AllPartitions)
    }

    /// Returns `true` if the scope is exactly the default partition.
    pub fn is_default_partition(&self) -> bool {
        matches!(self, RequestPartitionId::Partitions(ids) if ids.len() == 1 && ids[0].is_none())
    }

    /// Returns `true` if the default partition is part of the scope.
    pub fn has_default_partition_id(&self) -> bool {
        match self {
            RequestPartitionId::AllPartitions => false,
            RequestPartitionId::Partitions(ids) => ids.iter().any(Option::is_none),
        }
    }

    /// Returns the listed partitions; empty for [`RequestPartitionId::AllPartitions`].
    pub fn partition_ids(&self) -> &[Option<i32>] {
        match self {
            RequestPartitionId::AllPartitions => &[],
            RequestPartitionId::Partitions(ids) => ids,
        }
    }

    /// Returns the numbered partitions, excluding the default partition.
    pub fn partition_ids_without_default(&self) -> Vec<i32> {
        self.partition_ids().iter().flatten().copied().collect()
    }

    /// The partition a new resource is written to: the first listed partition,
    /// or the default partition for an all-partitions scope.
    pub fn first_partition_id(&self) -> Option<i32> {
        self.partition_ids().first().copied().flatten()
    }

    /// Returns `true` if a resource stored in `partition` is visible.
    pub fn contains(&self, partition: Option<i32>) -> bool {
        match self {
            RequestPartitionId::AllPartitions => true,
            RequestPartitionId::Partitions(ids) => ids.contains(&partition),
        }
    }

    /// Replaces the default partition with the configured default partition id.
    pub fn replace_default(&self, settings: &PartitionSettings) -> Self {
        match (self, settings.default_partition_id) {
            (RequestPartitionId::Partitions(ids), Some(default_id))
                if ids.iter().any(Option::is_none) =>
            {
                RequestPartitionId::Partitions(
                    ids.iter().map(|id| Some(id.unwrap_or(default_id))).collect(),
                )
            }
            _ => self.clone(),
        }
    }

    /// A stable string form usable as part of a cache key.
    pub fn stringify_for_key(&self) -> String {
        match self {
            RequestPartitionId::AllPartitions => "(all)".to_string(),
            RequestPartitionId::Partitions(ids) => ids
                .iter()
                .map(|id| match id {
                    Some(id) => id.to_string(),
                    None => "null".to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl Default for RequestPartitionId {
    fn default() -> Self {
        Self::default_partition()
    }
}

impl fmt::Display for RequestPartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stringify_for_key())
    }
}

/// A normalized partition predicate for identity lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionFilter {
    /// No partition restriction.
    Any,
    /// Only rows stored in the null (default) partition.
    NullOnly,
    /// Rows stored in one of `ids`, or in the null partition when `include_null`.
    In {
        /// Numbered partitions.
        ids: Vec<i32>,
        /// Whether the null partition is included.
        include_null: bool,
    },
}

impl PartitionFilter {
    /// Derives the filter for a request scope under the given settings.
    pub fn for_request(request: &RequestPartitionId, settings: &PartitionSettings) -> Self {
        if settings.allow_unqualified_cross_partition_reference || request.is_all_partitions() {
            return PartitionFilter::Any;
        }

        let request = request.replace_default(settings);
        if request.is_default_partition() {
            return PartitionFilter::NullOnly;
        }

        let ids = request.partition_ids_without_default();
        let include_null = request.has_default_partition_id();
        if ids.is_empty() && !include_null {
            // An empty partition list places no restriction
            return PartitionFilter::Any;
        }
        PartitionFilter::In { ids, include_null }
    }

    /// Returns `true` if exactly one partition passes the filter, so an
    /// external id can match at most one identity.
    pub fn is_single_partition(&self) -> bool {
        match self {
            PartitionFilter::Any => false,
            PartitionFilter::NullOnly => true,
            PartitionFilter::In { ids, include_null } => ids.len() + usize::from(*include_null) == 1,
        }
    }

    /// Returns `true` if a row stored in `partition` passes the filter.
    pub fn matches(&self, partition: Option<i32>) -> bool {
        match self {
            PartitionFilter::Any => true,
            PartitionFilter::NullOnly => partition.is_none(),
            PartitionFilter::In { ids, include_null } => match partition {
                Some(id) => ids.contains(&id),
                None => *include_null,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_partition() {
        let scope = RequestPartitionId::default_partition();
        assert!(scope.is_default_partition());
        assert!(scope.has_default_partition_id());
        assert!(!scope.is_all_partitions());
        assert_eq!(scope.first_partition_id(), None);
        assert_eq!(scope.stringify_for_key(), "null");
    }

    #[test]
    fn test_contains() {
        let scope = RequestPartitionId::from_partition_ids([Some(1), Some(2)]);
        assert!(scope.contains(Some(1)));
        assert!(!scope.contains(Some(3)));
        assert!(!scope.contains(None));
        assert!(RequestPartitionId::all_partitions().contains(Some(42)));
    }

    #[test]
    fn test_replace_default() {
        let settings = PartitionSettings::default().with_default_partition_id(0);
        let scope = RequestPartitionId::from_partition_ids([None, Some(3)]);
        let replaced = scope.replace_default(&settings);
        assert_eq!(replaced.partition_ids(), &[Some(0), Some(3)]);

        let untouched = scope.replace_default(&PartitionSettings::default());
        assert_eq!(untouched, scope);
    }

    #[test]
    fn test_filter_for_all_partitions() {
        let filter = PartitionFilter::for_request(
            &RequestPartitionId::all_partitions(),
            &PartitionSettings::default(),
        );
        assert_eq!(filter, PartitionFilter::Any);
        assert!(filter.matches(Some(7)));
        assert!(filter.matches(None));
    }

    #[test]
    fn test_filter_for_default_partition() {
        let filter = PartitionFilter::for_request(
            &RequestPartitionId::default_partition(),
            &PartitionSettings::default(),
        );
        assert_eq!(filter, PartitionFilter::NullOnly);
        assert!(filter.matches(None));
        assert!(!filter.matches(Some(1)));
    }

    #[test]
    fn test_filter_with_numbered_default() {
        let settings = PartitionSettings::default().with_default_partition_id(0);
        let filter =
            PartitionFilter::for_request(&RequestPartitionId::default_partition(), &settings);
        assert_eq!(
            filter,
            PartitionFilter::In {
                ids: vec![0],
                include_null: false
            }
        );
    }

    #[test]
    fn test_filter_mixed() {
        let filter = PartitionFilter::for_request(
            &RequestPartitionId::from_partition_ids([None, Some(2)]),
            &PartitionSettings::default(),
        );
        assert!(filter.matches(None));
        assert!(filter.matches(Some(2)));
        assert!(!filter.matches(Some(3)));
        assert!(!filter.is_single_partition());
    }

    #[test]
    fn test_single_partition_filters() {
        let settings = PartitionSettings::default();
        assert!(
            PartitionFilter::for_request(&RequestPartitionId::default_partition(), &settings)
                .is_single_partition()
        );
        assert!(
            PartitionFilter::for_request(&RequestPartitionId::from_partition_id(4), &settings)
                .is_single_partition()
        );
        assert!(
            !PartitionFilter::for_request(&RequestPartitionId::all_partitions(), &settings)
                .is_single_partition()
        );
    }

    #[test]
    fn test_filter_cross_partition_references() {
        let settings = PartitionSettings::default().with_cross_partition_references(true);
        let filter =
            PartitionFilter::for_request(&RequestPartitionId::from_partition_id(5), &settings);
        assert_eq!(filter, PartitionFilter::Any);
    }
}
